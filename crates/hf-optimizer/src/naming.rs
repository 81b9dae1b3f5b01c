use rand::seq::IndexedRandom;
use rand::Rng;

const COLORS: &[&str] = &["red", "blue", "green", "golden", "silver"];
const ADJECTIVES: &[&str] = &["brave", "sneaky", "swift", "lucky", "tiny", "giant"];
const ANIMALS: &[&str] = &["fox", "owl", "bear", "wolf", "tiger", "panda", "hawk"];

fn pick<R>(words: &[&'static str], rng: &mut R) -> &'static str
where
    R: Rng + ?Sized,
{
    words.choose(rng).copied().unwrap_or("anon")
}

/// Human-readable display name such as `golden-swift-owl`.
///
/// Names are not unique; run ids identify trials.
pub fn random_name<R>(rng: &mut R) -> String
where
    R: Rng + ?Sized,
{
    let color = pick(COLORS, rng);
    let adjective = pick(ADJECTIVES, rng);
    let animal = pick(ANIMALS, rng);
    format!("{color}-{adjective}-{animal}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn names_have_three_known_parts() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for _ in 0..50 {
            let name = random_name(&mut rng);
            let parts: Vec<&str> = name.split('-').collect();
            assert_eq!(parts.len(), 3);
            assert!(COLORS.contains(&parts[0]));
            assert!(ADJECTIVES.contains(&parts[1]));
            assert!(ANIMALS.contains(&parts[2]));
        }
    }

    #[test]
    fn same_seed_same_name() {
        let a = random_name(&mut ChaCha8Rng::seed_from_u64(42));
        let b = random_name(&mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
