use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::Pubkey;

pub const MAX_SEED_LEN: usize = 32;
pub const MAX_SEEDS: usize = 16;
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

pub const ACADEMY_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    136, 148, 252, 41, 149, 55, 27, 171, 100, 111, 57, 227, 16, 158, 224, 88,
    72, 19, 135, 103, 100, 131, 187, 229, 9, 178, 177, 76, 206, 75, 11, 228,
]);
pub const TOKEN_2022_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    6, 221, 246, 225, 238, 117, 143, 222, 24, 66, 93, 188, 228, 108, 205, 218,
    182, 26, 252, 77, 131, 185, 13, 39, 254, 189, 249, 40, 216, 161, 139, 252,
]);
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    140, 151, 37, 143, 78, 36, 137, 241, 187, 61, 16, 41, 20, 142, 13, 131,
    11, 90, 19, 153, 218, 255, 16, 132, 4, 142, 123, 216, 219, 233, 248, 89,
]);
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0u8; 32]);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("seed {index} is {len} bytes, max is {MAX_SEED_LEN}")]
    SeedTooLong { index: usize, len: usize },
    #[error("{0} seeds given, max is {MAX_SEEDS}")]
    TooManySeeds(usize),
    #[error("derived address lies on the ed25519 curve")]
    OnCurve,
    #[error("no viable bump seed")]
    NoViableBump,
}

/// Record families the academy program stores at derived addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Config,
    Course,
    Enrollment,
    MinterRole,
}

impl Namespace {
    pub fn tag(&self) -> &'static str {
        match self {
            Namespace::Config => "config",
            Namespace::Course => "course",
            Namespace::Enrollment => "enrollment",
            Namespace::MinterRole => "minter-role",
        }
    }

    /// Leading seed bytes as the program spells them.
    pub fn seed(&self) -> &'static [u8] {
        match self {
            Namespace::Config => b"config",
            Namespace::Course => b"course",
            Namespace::Enrollment => b"enrollment",
            Namespace::MinterRole => b"minter",
        }
    }
}

/// Whether 32 bytes decompress to an ed25519 point. Derived addresses must not.
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    VerifyingKey::from_bytes(bytes).is_ok()
}

fn check_seeds(seeds: &[&[u8]]) -> Result<(), AddressError> {
    if seeds.len() > MAX_SEEDS {
        return Err(AddressError::TooManySeeds(seeds.len()));
    }
    for (index, seed) in seeds.iter().enumerate() {
        if seed.len() > MAX_SEED_LEN {
            return Err(AddressError::SeedTooLong { index, len: seed.len() });
        }
    }
    Ok(())
}

pub fn create_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Result<Pubkey, AddressError> {
    check_seeds(seeds)?;
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);
    let digest: [u8; 32] = hasher.finalize().into();
    if is_on_curve(&digest) {
        return Err(AddressError::OnCurve);
    }
    Ok(Pubkey::new_from_array(digest))
}

/// Searches bumps 255..=0 and returns the first off-curve address with its bump.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Result<(Pubkey, u8), AddressError> {
    // the bump occupies one seed slot
    if seeds.len() >= MAX_SEEDS {
        return Err(AddressError::TooManySeeds(seeds.len() + 1));
    }
    check_seeds(seeds)?;
    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = seeds.to_vec();
        with_bump.push(&bump_seed);
        match create_program_address(&with_bump, program_id) {
            Ok(address) => return Ok((address, bump)),
            Err(AddressError::OnCurve) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(AddressError::NoViableBump)
}

/// Address derivation for one deployment of the academy program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: Pubkey,
}

impl Default for AddressDeriver {
    fn default() -> Self { Self::new(ACADEMY_PROGRAM_ID) }
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey) -> Self { Self { program_id } }

    pub fn program_id(&self) -> Pubkey { self.program_id }

    pub fn derive(&self, namespace: Namespace, components: &[&[u8]]) -> Result<(Pubkey, u8), AddressError> {
        let mut seeds: Vec<&[u8]> = Vec::with_capacity(components.len() + 1);
        seeds.push(namespace.seed());
        seeds.extend_from_slice(components);
        find_program_address(&seeds, &self.program_id)
    }

    pub fn config(&self) -> Result<(Pubkey, u8), AddressError> {
        self.derive(Namespace::Config, &[])
    }

    pub fn course(&self, course_id: &str) -> Result<(Pubkey, u8), AddressError> {
        self.derive(Namespace::Course, &[course_id.as_bytes()])
    }

    pub fn enrollment(&self, course_id: &str, learner: &Pubkey) -> Result<(Pubkey, u8), AddressError> {
        self.derive(Namespace::Enrollment, &[course_id.as_bytes(), learner.as_ref()])
    }

    pub fn minter_role(&self, minter: &Pubkey) -> Result<(Pubkey, u8), AddressError> {
        self.derive(Namespace::MinterRole, &[minter.as_ref()])
    }

    /// Learner's Token-2022 associated account for the reward mint.
    pub fn reward_account(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Pubkey, AddressError> {
        let token_program = TOKEN_2022_PROGRAM_ID;
        let seeds: [&[u8]; 3] = [owner.as_ref(), token_program.as_ref(), mint.as_ref()];
        find_program_address(&seeds, &ASSOCIATED_TOKEN_PROGRAM_ID).map(|(address, _)| address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner() -> Pubkey {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        Pubkey::new_from_array(bytes)
    }

    #[test]
    fn program_ids_match_their_base58_names() {
        assert_eq!(ACADEMY_PROGRAM_ID.to_string(), "ACADBRCB3zGvo1KSCbkztS33ZNzeBv2d7bqGceti3ucf");
        assert_eq!(TOKEN_2022_PROGRAM_ID.to_string(), "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");
        assert_eq!(ASSOCIATED_TOKEN_PROGRAM_ID.to_string(), "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");
        assert_eq!(SYSTEM_PROGRAM_ID.to_string(), "11111111111111111111111111111111");
    }

    #[test]
    fn known_addresses() {
        let d = AddressDeriver::default();
        let (config, bump) = d.config().unwrap();
        assert_eq!(config.to_string(), "GjsatVW8i6vvHHGtTd59xhRPud1SfoS8ckxL5bGeM7sc");
        assert_eq!(bump, 255);

        let (course, bump) = d.course("solana-101").unwrap();
        assert_eq!(course.to_string(), "DR2hezknxfjwccUs2aCB3VNKdS1zg6Zies2QkFfDNnoW");
        assert_eq!(bump, 249);

        let (enrollment, bump) = d.enrollment("solana-101", &learner()).unwrap();
        assert_eq!(enrollment.to_string(), "B7HHV5NbwDwDSQ1z1bvkLanEAMB8D6gNtDFCc7Nktyq5");
        assert_eq!(bump, 255);

        let mint = Pubkey::new_from_array([9u8; 32]);
        let ata = d.reward_account(&learner(), &mint).unwrap();
        assert_eq!(ata.to_string(), "Hbo5EoVF7cHz9vtVrQ22xFMDAt1ufEWX5vkiAJ6wKYeV");
    }

    #[test]
    fn derivation_is_deterministic_and_off_curve() {
        let d = AddressDeriver::default();
        let a = d.enrollment("rust-201", &learner()).unwrap();
        let b = d.enrollment("rust-201", &learner()).unwrap();
        assert_eq!(a, b);
        assert!(!is_on_curve(a.0.as_bytes()));
    }

    #[test]
    fn found_bump_recreates_the_address() {
        let d = AddressDeriver::default();
        let (address, bump) = d.course("anchor-basics").unwrap();
        let bump_seed = [bump];
        let seeds: [&[u8]; 3] = [b"course", b"anchor-basics", &bump_seed];
        assert_eq!(create_program_address(&seeds, &ACADEMY_PROGRAM_ID).unwrap(), address);
    }

    #[test]
    fn distinct_seed_tuples_give_distinct_addresses() {
        let d = AddressDeriver::default();
        let other = Pubkey::new_from_array([7u8; 32]);
        let a = d.enrollment("c1", &learner()).unwrap().0;
        let b = d.enrollment("c2", &learner()).unwrap().0;
        let c = d.enrollment("c1", &other).unwrap().0;
        let course = d.course("c1").unwrap().0;
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, course);
        assert_ne!(d.minter_role(&other).unwrap().0, d.minter_role(&learner()).unwrap().0);
    }

    #[test]
    fn program_id_changes_the_address() {
        let a = AddressDeriver::default().config().unwrap().0;
        let b = AddressDeriver::new(Pubkey::new_from_array([3u8; 32])).config().unwrap().0;
        assert_ne!(a, b);
    }

    #[test]
    fn course_id_longer_than_a_seed_is_rejected() {
        let d = AddressDeriver::default();
        let long = "x".repeat(33);
        assert_eq!(d.course(&long), Err(AddressError::SeedTooLong { index: 1, len: 33 }));
        assert!(d.course(&"x".repeat(32)).is_ok());
    }

    #[test]
    fn too_many_seeds_is_rejected() {
        let seeds: Vec<&[u8]> = vec![b"a".as_slice(); MAX_SEEDS];
        assert_eq!(
            find_program_address(&seeds, &ACADEMY_PROGRAM_ID),
            Err(AddressError::TooManySeeds(MAX_SEEDS + 1))
        );
    }

    #[test]
    fn namespace_tags() {
        assert_eq!(Namespace::MinterRole.tag(), "minter-role");
        assert_eq!(Namespace::MinterRole.seed(), b"minter");
        assert_eq!(Namespace::Enrollment.seed(), b"enrollment");
    }
}
