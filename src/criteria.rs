//! Selection criteria
//!
//! A criterion is an external input the rule engine matches against:
//! **exclusive** criteria hold exactly one of their declared numerical
//! states, **inclusive** criteria hold a bitmask over up to 32 declared
//! values. State can be set numerically or parsed from a lexical expression
//! (for inclusive criteria, a space-separated list of literals ORed
//! together).
//!
//! Criteria are passive here: the framework observes `set_state`'s
//! changed/unchanged result and runs the apply pipeline itself, holding the
//! parameter lock; the observer of the original design is a direct method
//! call, not a callback.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt::Write as _;

/// Stable index of a criterion in the criteria set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CriterionId(pub usize);

impl CriterionId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CriterionError {
    #[error("criterion declaration: {0}")]
    Declaration(String),
    #[error("unknown criterion {0}")]
    Unknown(String),
    #[error("literal {literal} is not part of criterion {criterion}")]
    UnknownLiteral { criterion: String, literal: String },
    #[error("state {state} is not admissible for criterion {criterion}")]
    InvalidState { criterion: String, state: u32 },
}

/// Requested rendering of a criterion's description.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CriterionFormat {
    Csv,
    Xml,
}

/// One selection criterion: kind, value mapping and current state.
#[derive(Clone, Debug)]
pub struct Criterion {
    name: String,
    inclusive: bool,
    /// (numerical, literal) pairs; for inclusive criteria the numericals are
    /// the bitmask contributions of each value.
    pairs: Vec<(u32, String)>,
    state: u32,
}

impl Criterion {
    fn new(
        name: String,
        inclusive: bool,
        pairs: Vec<(u32, String)>,
    ) -> Result<Self, CriterionError> {
        if inclusive && pairs.len() > 32 {
            return Err(CriterionError::Declaration(format!(
                "inclusive criterion {name} declares {} values (32 max)",
                pairs.len()
            )));
        }
        for (i, (num, lit)) in pairs.iter().enumerate() {
            for (other_num, other_lit) in &pairs[..i] {
                if other_num == num || other_lit == lit {
                    return Err(CriterionError::Declaration(format!(
                        "duplicate value pair ({num}, {lit}) in criterion {name}"
                    )));
                }
            }
        }
        // The initial state: exclusive criteria sit on their first declared
        // value, inclusive criteria start empty.
        let state = if inclusive {
            0
        } else {
            pairs.first().map(|(n, _)| *n).unwrap_or(0)
        };
        Ok(Self {
            name,
            inclusive,
            pairs,
            state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_inclusive(&self) -> bool {
        self.inclusive
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    /// Declared (numerical, literal) pairs, in declaration order.
    pub fn pairs(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.pairs.iter().map(|(n, l)| (*n, l.as_str()))
    }

    /// The union of declared inclusive bits.
    fn admissible_mask(&self) -> u32 {
        self.pairs.iter().fold(0, |m, (n, _)| m | n)
    }

    /// Numerical state assignment; rejects values outside the declared set
    /// (exclusive) or mask (inclusive). Returns whether the state changed.
    pub fn set_state(&mut self, state: u32) -> Result<bool, CriterionError> {
        let admissible = if self.inclusive {
            state & !self.admissible_mask() == 0
        } else {
            self.pairs.iter().any(|(n, _)| *n == state)
        };
        if !admissible {
            return Err(CriterionError::InvalidState {
                criterion: self.name.clone(),
                state,
            });
        }
        let changed = self.state != state;
        self.state = state;
        Ok(changed)
    }

    /// Lexical state assignment: one literal for exclusive criteria, a
    /// space-separated literal list ORed together for inclusive ones (the
    /// empty list clears the mask).
    pub fn set_state_lexical(&mut self, expression: &str) -> Result<bool, CriterionError> {
        let state = self.parse_state(expression)?;
        // Parsing already validated admissibility.
        let changed = self.state != state;
        self.state = state;
        Ok(changed)
    }

    fn parse_state(&self, expression: &str) -> Result<u32, CriterionError> {
        if self.inclusive {
            let mut state = 0;
            for literal in expression.split_whitespace() {
                state |= self.numerical(literal)?;
            }
            Ok(state)
        } else {
            self.numerical(expression.trim())
        }
    }

    /// Literal → numerical lookup.
    pub fn numerical(&self, literal: &str) -> Result<u32, CriterionError> {
        self.pairs
            .iter()
            .find(|(_, l)| l == literal)
            .map(|(n, _)| *n)
            .ok_or_else(|| CriterionError::UnknownLiteral {
                criterion: self.name.clone(),
                literal: literal.to_string(),
            })
    }

    /// Numerical → literal rendering; inclusive states render as their set
    /// values joined with `|`, the empty mask as `<none>`.
    pub fn literal(&self, state: u32) -> String {
        if self.inclusive {
            let parts: Vec<&str> = self
                .pairs
                .iter()
                .filter(|&&(n, _)| n != 0 && (state & n) == n)
                .map(|(_, l)| l.as_str())
                .collect();
            if parts.is_empty() {
                "<none>".to_string()
            } else {
                parts.join("|")
            }
        } else {
            self.pairs
                .iter()
                .find(|(n, _)| *n == state)
                .map(|(_, l)| l.clone())
                .unwrap_or_else(|| state.to_string())
        }
    }

    /// Current state, formatted for the status surfaces.
    pub fn describe(&self, format: CriterionFormat) -> String {
        let kind = if self.inclusive {
            "Inclusive"
        } else {
            "Exclusive"
        };
        match format {
            CriterionFormat::Csv => format!(
                "{},{},{}",
                self.name,
                kind,
                self.literal(self.state)
            ),
            CriterionFormat::Xml => format!(
                "<SelectionCriterion Name=\"{}\" Kind=\"{}\" State=\"{}\"/>",
                self.name,
                kind,
                self.literal(self.state)
            ),
        }
    }
}

/// The named criteria of one framework instance.
#[derive(Clone, Debug, Default)]
pub struct Criteria {
    criteria: Vec<Criterion>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(
        &mut self,
        name: &str,
        inclusive: bool,
        pairs: Vec<(u32, String)>,
    ) -> Result<CriterionId, CriterionError> {
        if self.find(name).is_some() {
            return Err(CriterionError::Declaration(format!(
                "criterion {name} already exists"
            )));
        }
        self.criteria
            .push(Criterion::new(name.to_string(), inclusive, pairs)?);
        Ok(CriterionId(self.criteria.len() - 1))
    }

    /// Declare an exclusive criterion over (numerical, literal) pairs.
    pub fn create_exclusive(
        &mut self,
        name: &str,
        pairs: &[(u32, &str)],
    ) -> Result<CriterionId, CriterionError> {
        self.create(
            name,
            false,
            pairs.iter().map(|(n, l)| (*n, l.to_string())).collect(),
        )
    }

    /// Declare an inclusive criterion over at most 32 (bit value, literal)
    /// pairs.
    pub fn create_inclusive(
        &mut self,
        name: &str,
        pairs: &[(u32, &str)],
    ) -> Result<CriterionId, CriterionError> {
        self.create(
            name,
            true,
            pairs.iter().map(|(n, l)| (*n, l.to_string())).collect(),
        )
    }

    pub fn find(&self, name: &str) -> Option<CriterionId> {
        self.criteria
            .iter()
            .position(|c| c.name == name)
            .map(CriterionId)
    }

    pub fn get(&self, id: CriterionId) -> &Criterion {
        &self.criteria[id.0]
    }

    pub fn get_mut(&mut self, id: CriterionId) -> &mut Criterion {
        &mut self.criteria[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = CriterionId> {
        (0..self.criteria.len()).map(CriterionId)
    }

    /// One line per criterion in the requested format.
    pub fn list(&self, format: CriterionFormat) -> String {
        let mut out = String::new();
        for c in &self.criteria {
            let _ = writeln!(out, "{}", c.describe(format));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> Criteria {
        let mut criteria = Criteria::new();
        criteria
            .create_inclusive("Flags", &[(1, "A"), (2, "B"), (4, "C")])
            .unwrap();
        criteria
            .create_exclusive("Mode", &[(0, "Production"), (1, "Test")])
            .unwrap();
        criteria
    }

    #[test]
    fn exclusive_state_round_trips_and_rejects_strays() {
        let mut criteria = flags();
        let mode = criteria.find("Mode").unwrap();
        assert_eq!(criteria.get(mode).state(), 0); // first declared value

        assert!(criteria.get_mut(mode).set_state(1).unwrap());
        assert_eq!(criteria.get(mode).state(), 1);
        assert_eq!(criteria.get(mode).literal(1), "Test");
        // Unchanged assignment reports no change.
        assert!(!criteria.get_mut(mode).set_state(1).unwrap());
        assert!(matches!(
            criteria.get_mut(mode).set_state(7),
            Err(CriterionError::InvalidState { .. })
        ));
    }

    #[test]
    fn inclusive_state_is_a_bitmask_with_lexical_or() {
        let mut criteria = flags();
        let flags = criteria.find("Flags").unwrap();
        assert_eq!(criteria.get(flags).state(), 0);

        assert!(criteria.get_mut(flags).set_state_lexical("A C").unwrap());
        assert_eq!(criteria.get(flags).state(), 5);
        assert_eq!(criteria.get(flags).literal(5), "A|C");
        assert_eq!(criteria.get(flags).literal(0), "<none>");

        // Clearing through the empty expression.
        assert!(criteria.get_mut(flags).set_state_lexical("").unwrap());
        assert_eq!(criteria.get(flags).state(), 0);

        // Bits outside the declared mask are inadmissible.
        assert!(criteria.get_mut(flags).set_state(8).is_err());
        assert!(criteria
            .get_mut(flags)
            .set_state_lexical("A D")
            .is_err());
    }

    #[test]
    fn declarations_reject_duplicates_and_oversized_inclusive_sets() {
        let mut criteria = Criteria::new();
        assert!(criteria
            .create_exclusive("X", &[(0, "a"), (0, "b")])
            .is_err());
        assert!(criteria
            .create_exclusive("X", &[(0, "a"), (1, "a")])
            .is_err());
        criteria.create_exclusive("X", &[(0, "a")]).unwrap();
        assert!(criteria.create_exclusive("X", &[(0, "a")]).is_err());

        let too_many: Vec<(u32, String)> =
            (0..33).map(|i| (1u32 << (i % 32), format!("v{i}"))).collect();
        let as_refs: Vec<(u32, &str)> =
            too_many.iter().map(|(n, l)| (*n, l.as_str())).collect();
        assert!(criteria.create_inclusive("Y", &as_refs).is_err());
    }

    #[test]
    fn description_formats() {
        let mut criteria = flags();
        let flags_id = criteria.find("Flags").unwrap();
        criteria.get_mut(flags_id).set_state(3).unwrap();
        assert_eq!(
            criteria.get(flags_id).describe(CriterionFormat::Csv),
            "Flags,Inclusive,A|B"
        );
        assert_eq!(
            criteria.get(flags_id).describe(CriterionFormat::Xml),
            "<SelectionCriterion Name=\"Flags\" Kind=\"Inclusive\" State=\"A|B\"/>"
        );
    }
}
