//! Random display names for pods and machines

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "able", "brave", "calm", "clever", "crisp", "eager", "fair", "fast", "fond", "glad",
    "grand", "happy", "humble", "keen", "kind", "lucky", "merry", "modest", "neat", "noble",
    "proud", "quick", "quiet", "rapid", "sharp", "smart", "steady", "sunny", "swift", "tidy",
    "vivid", "warm", "wise", "witty", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "beetle", "bison", "cobra", "condor", "crane", "eagle", "falcon", "ferret",
    "gecko", "gopher", "heron", "ibex", "jackal", "koala", "lemur", "lynx", "marten", "moose",
    "newt", "ocelot", "otter", "panda", "puffin", "quail", "raven", "salmon", "seal", "tapir",
    "toucan", "viper", "walrus", "weasel", "wombat", "yak", "zebra",
];

/// Two-word name such as `swift-otter`
pub fn petname<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("new");
    let noun = NOUNS.choose(rng).copied().unwrap_or("node");
    format!("{}-{}", adjective, noun)
}

/// Random name for which `taken` returns false.
///
/// Falls back to a numeric suffix once the word space looks crowded.
pub fn unique_petname(taken: impl Fn(&str) -> bool) -> String {
    let mut rng = rand::thread_rng();
    for _ in 0..64 {
        let name = petname(&mut rng);
        if !taken(&name) {
            return name;
        }
    }
    loop {
        let name = format!("{}-{}", petname(&mut rng), rng.gen_range(100..10_000));
        if !taken(&name) {
            return name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::is_valid_hostname;

    #[test]
    fn test_petnames_are_valid_hostnames() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            assert!(is_valid_hostname(&petname(&mut rng)));
        }
    }

    #[test]
    fn test_unique_petname_avoids_taken() {
        let name = unique_petname(|candidate| !candidate.contains(char::is_numeric));
        assert!(name.chars().any(|c| c.is_ascii_digit()));
        assert!(is_valid_hostname(&name));
    }
}
