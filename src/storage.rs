use chrono::Local;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "nthprime";
const EXECUTION_LOG: &str = "execution_log.txt";

/// Data directory: `$XDG_DATA_HOME/nthprime`, else `$HOME/.local/share/nthprime`
pub fn get_data_dir() -> io::Result<PathBuf> {
    resolve_data_dir(env::var("XDG_DATA_HOME").ok(), env::var("HOME").ok()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine data directory (neither XDG_DATA_HOME nor HOME is set)",
        )
    })
}

fn resolve_data_dir(xdg_data_home: Option<String>, home: Option<String>) -> Option<PathBuf> {
    xdg_data_home
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .or_else(|| home.map(|home| PathBuf::from(home).join(".local/share")))
        .map(|base| base.join(APP_DIR))
}

/// Appends one line for this run to the execution log in the data directory
pub fn log_execution(subcommand: &str, args: &str, mode: &str, duration_us: u128) -> io::Result<()> {
    append_execution_log(&get_data_dir()?, subcommand, args, mode, duration_us)
}

fn append_execution_log(
    data_dir: &Path,
    subcommand: &str,
    args: &str,
    mode: &str,
    duration_us: u128,
) -> io::Result<()> {
    fs::create_dir_all(data_dir)?;

    let log_path = data_dir.join(EXECUTION_LOG);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");

    writeln!(
        file,
        "{} | {} | {} | {} | {}us",
        timestamp, subcommand, args, mode, duration_us
    )?;

    Ok(())
}

/// Buffered writer to `path`, or to stdout when no path is given
pub fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

/// Writes one prime per line, returning the number written
pub fn write_primes_text<W: Write>(writer: &mut W, primes: &[i64]) -> io::Result<usize> {
    let mut itoa_buf = itoa::Buffer::new();

    for &prime in primes {
        writer.write_all(itoa_buf.format(prime).as_bytes())?;
        writer.write_all(b"\n")?;
    }

    writer.flush()?;
    Ok(primes.len())
}

/// Writes primes as 8 bytes each, little-endian, returning the number written
pub fn write_primes_binary<W: Write>(writer: &mut W, primes: &[i64]) -> io::Result<usize> {
    for &prime in primes {
        writer.write_all(&prime.to_le_bytes())?;
    }

    writer.flush()?;
    Ok(primes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        env::temp_dir().join(format!("nthprime-{}-{}-{}", name, std::process::id(), nanos))
    }

    #[test]
    fn test_resolve_data_dir_prefers_xdg() {
        let dir = resolve_data_dir(Some("/data".to_string()), Some("/home/u".to_string()));
        assert_eq!(dir, Some(PathBuf::from("/data/nthprime")));
    }

    #[test]
    fn test_resolve_data_dir_ignores_empty_xdg() {
        let dir = resolve_data_dir(Some(String::new()), Some("/home/u".to_string()));
        assert_eq!(dir, Some(PathBuf::from("/home/u/.local/share/nthprime")));
    }

    #[test]
    fn test_resolve_data_dir_none() {
        assert_eq!(resolve_data_dir(None, None), None);
    }

    #[test]
    fn test_append_execution_log() {
        let dir = scratch_dir("log");

        append_execution_log(&dir, "nth", "1000000", "parallel", 1234).unwrap();
        append_execution_log(&dir, "count", "100", "sequential", 56).unwrap();

        let content = fs::read_to_string(dir.join(EXECUTION_LOG)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" | nth | 1000000 | parallel | 1234us"));
        assert!(lines[1].ends_with(" | count | 100 | sequential | 56us"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_write_primes_text() {
        let mut out = Vec::new();
        let written = write_primes_text(&mut out, &[2, 3, 5, 15485867]).unwrap();

        assert_eq!(written, 4);
        assert_eq!(String::from_utf8(out).unwrap(), "2\n3\n5\n15485867\n");
    }

    #[test]
    fn test_write_primes_binary() {
        let mut out = Vec::new();
        let written = write_primes_binary(&mut out, &[2, 2038074751]).unwrap();

        assert_eq!(written, 2);
        assert_eq!(out.len(), 16);
        assert_eq!(i64::from_le_bytes(out[0..8].try_into().unwrap()), 2);
        assert_eq!(i64::from_le_bytes(out[8..16].try_into().unwrap()), 2038074751);
    }

    #[test]
    fn test_open_output_file() {
        let dir = scratch_dir("out");
        let path = dir.join("primes.txt");

        {
            let mut writer = open_output(Some(&path)).unwrap();
            write_primes_text(&mut writer, &[2, 3, 5]).unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "2\n3\n5\n");
        fs::remove_dir_all(dir).unwrap();
    }
}
