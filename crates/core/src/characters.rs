use rand::seq::SliceRandom;
use rand::Rng;

use crate::story::Character;

const NAMES: &[&str] = &[
    "Mira", "Kael", "Sorrel", "Ilya", "Branwen", "Tovi", "Anselm", "Ondine", "Reza", "Petra",
    "Lorcan", "Yusra", "Edda", "Casimir", "Nerys", "Jorah",
];

const ROLES: &[&str] = &[
    "a healer",
    "a retired soldier",
    "a wandering cartographer",
    "an apprentice clockmaker",
    "a ship's navigator",
    "a disgraced scholar",
    "a market fortune-teller",
    "a lighthouse keeper",
    "an exiled noble",
    "a traveling musician",
];

const TRAITS: &[&str] = &[
    "with a talent for finding lost things",
    "who never speaks above a whisper",
    "haunted by a promise they could not keep",
    "with an encyclopedic memory for faces",
    "who collects other people's secrets",
    "known for laughing at the worst possible moment",
    "who trusts animals more than people",
    "carrying a debt that cannot be repaid in coin",
];

/// Draws a character from the built-in pools using the given generator.
/// Pools are non-empty constants, so the draws cannot fail.
pub fn random_character_with<R: Rng + ?Sized>(rng: &mut R) -> Character {
    let name = NAMES.choose(rng).copied().unwrap_or("Mira");
    let role = ROLES.choose(rng).copied().unwrap_or("a healer");
    let trait_line = TRAITS
        .choose(rng)
        .copied()
        .unwrap_or("with a talent for finding lost things");
    Character::new(name, format!("{role} {trait_line}"))
        .expect("built-in character pools produce non-empty fields")
}

/// Convenience wrapper over the thread-local generator.
pub fn random_character() -> Character {
    random_character_with(&mut rand::thread_rng())
}
