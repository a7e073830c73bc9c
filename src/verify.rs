use rug::Integer;
use rug::integer::IsPrime;

/// Miller-Rabin rounds used for probable-prime checks
pub const MILLER_RABIN_REPS: u32 = 30;

/// Probabilistic primality test backed by GMP
pub fn is_probable_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }

    !matches!(
        Integer::from(n).is_probably_prime(MILLER_RABIN_REPS),
        IsPrime::No
    )
}

/// First entry of `primes` that is not prime or breaks ascending order,
/// as `(index, value)`
pub fn first_invalid(primes: &[i64]) -> Option<(usize, i64)> {
    let mut previous = None;

    for (i, &p) in primes.iter().enumerate() {
        let ascending = previous.is_none_or(|prev| prev < p);
        if !ascending || !is_probable_prime(p) {
            return Some((i, p));
        }
        previous = Some(p);
    }

    None
}
