//! Tournament registry: the fixed set of competitions the worker follows.
//!
//! Loaded once at startup (TOML file or the built-in table) and handed to the
//! scraper and the scheduler as an `Arc<TournamentRegistry>`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// A named single-elimination stage of a cup competition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KnockoutPhase {
    /// Round id the source files this phase under. May collide with a
    /// league-phase round number.
    pub round_id: u32,
    pub slug: String,
    #[serde(default)]
    pub prefix: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TournamentConfig {
    pub name: String,
    pub tournament_id: u32,
    pub season_id: u32,
    /// Number of league (or league-phase) rounds.
    pub total_rounds: u32,
    /// Ordered knockout phases played after the last league round.
    #[serde(default)]
    pub knockout_phases: Vec<KnockoutPhase>,
}

impl TournamentConfig {
    pub fn is_cup(&self) -> bool {
        !self.knockout_phases.is_empty()
    }

    /// True when `round` is also used as a league-phase round number.
    pub fn collides_with_league(&self, round: u32) -> bool {
        (1..=self.total_rounds).contains(&round)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TournamentRegistry {
    #[serde(rename = "tournament", default)]
    tournaments: Vec<TournamentConfig>,
}

impl TournamentRegistry {
    pub fn new(tournaments: Vec<TournamentConfig>) -> Result<Self> {
        let registry = Self { tournaments };
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let registry: Self = toml::from_str(raw).context("invalid tournament registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read tournament registry {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Competitions followed when no registry file is configured.
    pub fn builtin() -> Self {
        let phase = |round_id, slug: &str, name: &str| KnockoutPhase {
            round_id,
            slug: slug.to_string(),
            prefix: None,
            name: name.to_string(),
        };

        Self {
            tournaments: vec![
                TournamentConfig {
                    name: "Premier League".to_string(),
                    tournament_id: 17,
                    season_id: 76986,
                    total_rounds: 38,
                    knockout_phases: Vec::new(),
                },
                TournamentConfig {
                    name: "LaLiga".to_string(),
                    tournament_id: 8,
                    season_id: 77559,
                    total_rounds: 38,
                    knockout_phases: Vec::new(),
                },
                TournamentConfig {
                    name: "UEFA Champions League".to_string(),
                    tournament_id: 7,
                    season_id: 76953,
                    total_rounds: 8,
                    knockout_phases: vec![
                        phase(636, "playoff-round", "Playoff Round"),
                        phase(5, "round-of-16", "Round of 16"),
                        phase(27, "quarterfinals", "Quarterfinals"),
                        phase(28, "semifinals", "Semifinals"),
                        phase(29, "final", "Final"),
                    ],
                },
            ],
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for t in &self.tournaments {
            if !seen.insert(t.tournament_id) {
                bail!("tournament {} listed twice", t.tournament_id);
            }
            if t.total_rounds == 0 {
                bail!("tournament {} has no rounds", t.name);
            }
            let mut slugs = HashSet::new();
            for p in &t.knockout_phases {
                if !slugs.insert(p.slug.as_str()) {
                    bail!("tournament {}: knockout slug {} listed twice", t.name, p.slug);
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, tournament_id: u32) -> Option<&TournamentConfig> {
        self.tournaments.iter().find(|t| t.tournament_id == tournament_id)
    }

    pub fn by_name(&self, name: &str) -> Option<&TournamentConfig> {
        self.tournaments
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, tournament_id: u32) -> bool {
        self.get(tournament_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TournamentConfig> {
        self.tournaments.iter()
    }

    pub fn len(&self) -> usize {
        self.tournaments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tournaments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[tournament]]
name = "UEFA Champions League"
tournament_id = 7
season_id = 76953
total_rounds = 8

[[tournament.knockout_phases]]
round_id = 636
slug = "playoff-round"
name = "Playoff Round"

[[tournament.knockout_phases]]
round_id = 5
slug = "round-of-16"
prefix = "Knockout"
name = "Round of 16"

[[tournament]]
name = "Serie A"
tournament_id = 23
season_id = 76457
total_rounds = 38
"#;

    #[test]
    fn parses_toml_registry() {
        let registry = TournamentRegistry::from_toml_str(SAMPLE).unwrap();
        assert_eq!(registry.len(), 2);

        let ucl = registry.get(7).unwrap();
        assert!(ucl.is_cup());
        assert_eq!(ucl.knockout_phases[0].slug, "playoff-round");
        assert_eq!(ucl.knockout_phases[1].prefix.as_deref(), Some("Knockout"));
        assert!(ucl.collides_with_league(5));
        assert!(!ucl.collides_with_league(636));

        assert!(!registry.by_name("serie a").unwrap().is_cup());
        assert!(!registry.contains(17));
    }

    #[test]
    fn rejects_duplicate_tournaments() {
        let raw = format!("{SAMPLE}\n[[tournament]]\nname = \"dup\"\ntournament_id = 7\nseason_id = 1\ntotal_rounds = 1\n");
        assert!(TournamentRegistry::from_toml_str(&raw).is_err());
    }

    #[test]
    fn builtin_registry_is_valid() {
        let registry = TournamentRegistry::builtin();
        registry.validate().unwrap();
        assert_eq!(registry.get(7).unwrap().knockout_phases.len(), 5);
    }
}
