//! Built-in drug definitions, looked up by alias.

use super::Drug;
use crate::error::PKResult;
use chrono::Duration;

pub type DrugFactory = fn() -> PKResult<Drug>;

const ALIASES: &[(&[&str], DrugFactory)] = &[
    (&["estradiol", "e2"], estradiol),
    (&["estradiol gel", "estrogel", "gynokadin"], estradiol_gel),
    (&["estradiolvalerate", "estradiol valerate", "ev"], estradiol_valerate),
    (&["estradiolcypionate", "estradiol cypionate", "ecyp", "ecy", "ec"], estradiol_cypionate),
    (&["methylphenidate", "ritalin", "mph"], methylphenidate),
    (&["lisdexamphetamine", "elvanse", "lisdex", "ldx"], lisdexamphetamine),
    (&["amphetamine", "dexamphetamine"], dexamphetamine),
];

/// Resolves an alias (case-insensitive, surrounding whitespace ignored).
pub fn lookup(alias: &str) -> Option<DrugFactory> {
    let normalized = alias.trim().to_lowercase();
    ALIASES
        .iter()
        .find(|(names, _)| names.contains(&normalized.as_str()))
        .map(|(_, factory)| *factory)
}

pub fn create_drug(alias: &str) -> Option<PKResult<Drug>> {
    lookup(alias).map(|factory| factory())
}

pub fn estradiol() -> PKResult<Drug> {
    Drug::new("Estradiol", Duration::minutes(90))
}

pub fn estradiol_gel() -> PKResult<Drug> {
    Ok(Drug::new("Estradiol Gel", Duration::hours(36))?
        .with_blood_name("Estradiol")
        .with_flood_in(&[1.0, 2.0, 3.0, 2.0, 1.0])?
        .with_metabolite("Estradiol", 1.0))
}

pub fn estradiol_valerate() -> PKResult<Drug> {
    Drug::new("Estradiol valerate", Duration::hours(4 * 24 + 12))?
        .with_blood_name("Estradiol")
        .with_flood_in(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 8.0, 8.0, 8.0, 8.0, 8.0, 8.0, 8.0, 8.0,
            8.0, 8.0, 8.0, 8.0, 8.0, 8.0, 8.0, 8.0, 7.0, 7.0, 7.0, 7.0, 6.0, 6.0, 6.0, 6.0,
            5.0, 5.0, 5.0, 4.0, 4.0, 4.0, 3.0, 3.0, 3.0, 2.0, 2.0, 2.0, 1.0, 1.0, 0.5, 0.5,
        ])
}

pub fn estradiol_cypionate() -> PKResult<Drug> {
    let mut profile: Vec<f64> = (1..=14).map(|i| i as f64 * 0.5 + 0.5).collect();
    profile.extend(std::iter::repeat(8.0).take(34));
    profile.extend([
        7.5, 7.5, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 6.5, 6.5, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0,
        5.5, 5.5, 5.5, 5.0, 5.0, 5.0, 4.5, 4.5, 4.5, 4.0, 4.0, 4.0, 3.5, 3.5, 3.5, 3.0,
        3.0, 3.0, 2.5, 2.5, 2.5, 2.0, 2.0, 2.0, 1.5, 1.5, 1.0, 1.0, 0.5, 0.5,
    ]);
    
    Drug::new("Estradiol cypionate", Duration::days(9))?
        .with_blood_name("Estradiol")
        .with_flood_in(&profile)
}

pub fn methylphenidate() -> PKResult<Drug> {
    Drug::new("Methylphenidate", Duration::hours(3))?
        .with_flood_in(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0,
            7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0, 6.0, 6.0, 6.0, 6.0,
            5.0, 5.0, 5.0, 4.0, 4.0, 4.0, 3.0, 3.0, 3.0, 2.0, 2.0, 2.0, 1.0, 1.0, 0.5, 0.5,
        ])?
        .with_flood_in_step(Duration::seconds(150))
}

/// Lag of 15 minutes, half an hour ramp, one hour plateau, 45 minute tail.
pub fn lisdexamphetamine() -> PKResult<Drug> {
    let mut profile = vec![0.0; 15];
    profile.extend((1..=30).map(|i| i as f64 / 30.0));
    profile.extend(std::iter::repeat(1.0).take(60));
    profile.extend((0..45).map(|i| (45 - i) as f64 / 45.0));
    
    Ok(Drug::new("Lisdexamphetamine", Duration::minutes(30))?
        .with_flood_in(&profile)?
        .with_flood_in_step(Duration::minutes(1))?
        .with_metabolite("Dexamphetamine", 0.296))
}

pub fn dexamphetamine() -> PKResult<Drug> {
    Drug::new("Dexamphetamine", Duration::hours(10))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    
    #[test]
    fn test_alias_lookup() {
        assert_eq!(create_drug("E2").unwrap().unwrap().name, "Estradiol");
        assert_eq!(create_drug("  Estrogel ").unwrap().unwrap().name, "Estradiol Gel");
        assert_eq!(create_drug("LDX").unwrap().unwrap().name, "Lisdexamphetamine");
        assert_eq!(create_drug("ritalin").unwrap().unwrap().name, "Methylphenidate");
        assert!(lookup("aspirin").is_none());
    }
    
    #[test]
    fn test_every_catalog_entry_builds() {
        for (names, factory) in ALIASES {
            let drug = factory().unwrap();
            assert!(drug.half_life > Duration::zero(), "{:?}", names);
            if let Some(flood_in) = &drug.flood_in {
                assert_relative_eq!(flood_in.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            }
        }
    }
    
    #[test]
    fn test_profile_lengths() {
        assert_eq!(estradiol_valerate().unwrap().flood_in.unwrap().len(), 48);
        assert_eq!(estradiol_cypionate().unwrap().flood_in.unwrap().len(), 94);
        assert_eq!(methylphenidate().unwrap().flood_in.unwrap().len(), 48);
        assert_eq!(lisdexamphetamine().unwrap().flood_in.unwrap().len(), 150);
    }
    
    #[test]
    fn test_metabolite_targets_resolve() {
        for (_, factory) in ALIASES {
            for metabolite in factory().unwrap().metabolites {
                assert!(lookup(&metabolite.target).is_some(), "{}", metabolite.target);
            }
        }
    }
}
