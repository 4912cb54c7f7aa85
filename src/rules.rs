//! Rule engine
//!
//! Applicability rules are boolean trees over criterion matches:
//!
//! ```text
//! Rule := ("All" | "Any") "{" [ Rule ("," Rule)* ] "}"
//!       | name op value
//! op   := Is | IsNot | Includes | Excludes
//! ```
//!
//! `Includes`/`Excludes` only apply to inclusive criteria; `Is`/`IsNot` to
//! both kinds. The empty `All{}` matches, the empty `Any{}` does not.
//! Whitespace is skipped between tokens and braces must balance.
//!
//! Rules reference criteria by [`CriterionId`]; evaluation is a pure
//! function of the criteria states, so it cannot fail.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::criteria::{Criteria, CriterionId};

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule syntax: {0}")]
    Syntax(String),
    #[error("unknown compound rule type {0} (expected All or Any)")]
    UnknownCompound(String),
    #[error("unknown match operator {0}")]
    UnknownOperator(String),
    #[error("unknown criterion {0}")]
    UnknownCriterion(String),
    #[error("operator {op} requires an inclusive criterion, {criterion} is exclusive")]
    OperatorKind { op: MatchOp, criterion: String },
    #[error("value {value} is not part of criterion {criterion}")]
    BadValue { criterion: String, value: String },
}

/// Match operator of a rule atom.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchOp {
    Is,
    IsNot,
    Includes,
    Excludes,
}

impl MatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Is => "Is",
            Self::IsNot => "IsNot",
            Self::Includes => "Includes",
            Self::Excludes => "Excludes",
        }
    }

    fn parse(token: &str) -> Result<Self, RuleError> {
        match token {
            "Is" => Ok(Self::Is),
            "IsNot" => Ok(Self::IsNot),
            "Includes" => Ok(Self::Includes),
            "Excludes" => Ok(Self::Excludes),
            _ => Err(RuleError::UnknownOperator(token.to_string())),
        }
    }

    fn inclusive_only(self) -> bool {
        matches!(self, Self::Includes | Self::Excludes)
    }
}

impl std::fmt::Display for MatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compound (All/Any) node or a criterion-match atom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rule {
    Match {
        criterion: CriterionId,
        op: MatchOp,
        value: u32,
    },
    Compound {
        all: bool,
        children: Vec<Rule>,
    },
}

impl Rule {
    /// Build a checked atom.
    pub fn matching(
        criteria: &Criteria,
        criterion: CriterionId,
        op: MatchOp,
        value: u32,
    ) -> Result<Self, RuleError> {
        if op.inclusive_only() && !criteria.get(criterion).is_inclusive() {
            return Err(RuleError::OperatorKind {
                op,
                criterion: criteria.get(criterion).name().to_string(),
            });
        }
        Ok(Self::Match {
            criterion,
            op,
            value,
        })
    }

    pub fn all(children: Vec<Rule>) -> Self {
        Self::Compound {
            all: true,
            children,
        }
    }

    pub fn any(children: Vec<Rule>) -> Self {
        Self::Compound {
            all: false,
            children,
        }
    }

    /// Evaluate against the current criteria states.
    pub fn matches(&self, criteria: &Criteria) -> bool {
        match self {
            Self::Match {
                criterion,
                op,
                value,
            } => {
                let state = criteria.get(*criterion).state();
                match op {
                    MatchOp::Is => state == *value,
                    MatchOp::IsNot => state != *value,
                    MatchOp::Includes => state & value != 0,
                    MatchOp::Excludes => state & value == 0,
                }
            }
            Self::Compound { all, children } => {
                if *all {
                    children.iter().all(|c| c.matches(criteria))
                } else {
                    children.iter().any(|c| c.matches(criteria))
                }
            }
        }
    }

    /// Textual form, parseable back by [`Rule::parse`]. Match values render
    /// as criterion literals whenever the criterion maps them.
    pub fn dump(&self, criteria: &Criteria) -> String {
        match self {
            Self::Match {
                criterion,
                op,
                value,
            } => {
                let c = criteria.get(*criterion);
                format!("{} {} {}", c.name(), op, c.literal(*value))
            }
            Self::Compound { all, children } => {
                let inner: Vec<String> = children.iter().map(|c| c.dump(criteria)).collect();
                format!(
                    "{}{{{}}}",
                    if *all { "All" } else { "Any" },
                    inner.join(", ")
                )
            }
        }
    }

    /// Parse the textual grammar.
    pub fn parse(text: &str, criteria: &Criteria) -> Result<Self, RuleError> {
        let mut parser = Parser {
            text: text.as_bytes(),
            pos: 0,
            criteria,
        };
        let rule = parser.parse_rule()?;
        parser.skip_spaces();
        if parser.pos != parser.text.len() {
            return Err(RuleError::Syntax(format!(
                "unexpected trailing input at offset {}",
                parser.pos
            )));
        }
        Ok(rule)
    }
}

struct Parser<'a> {
    text: &'a [u8],
    pos: usize,
    criteria: &'a Criteria,
}

impl Parser<'_> {
    fn skip_spaces(&mut self) {
        while self.pos < self.text.len() && self.text[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    /// Consume up to the next delimiter of the grammar (`{`, `}`, `,`,
    /// whitespace) and return the word.
    fn next_word(&mut self) -> &str {
        let start = self.pos;
        while self.pos < self.text.len()
            && !matches!(self.text[self.pos], b'{' | b'}' | b',')
            && !self.text[self.pos].is_ascii_whitespace()
        {
            self.pos += 1;
        }
        // The slice boundaries sit on ASCII delimiters, so this cannot split
        // a UTF-8 sequence in a way from_utf8 would reject for valid input.
        std::str::from_utf8(&self.text[start..self.pos]).unwrap_or("")
    }

    fn parse_rule(&mut self) -> Result<Rule, RuleError> {
        self.skip_spaces();
        let word = self.next_word().to_string();
        if word.is_empty() {
            return Err(RuleError::Syntax(format!(
                "expected a rule at offset {}",
                self.pos
            )));
        }
        self.skip_spaces();
        if self.peek() == Some(b'{') {
            let all = match word.as_str() {
                "All" => true,
                "Any" => false,
                _ => return Err(RuleError::UnknownCompound(word)),
            };
            self.pos += 1; // consume '{'
            let mut children = Vec::new();
            self.skip_spaces();
            if self.peek() == Some(b'}') {
                self.pos += 1;
                return Ok(Rule::Compound { all, children });
            }
            loop {
                children.push(self.parse_rule()?);
                self.skip_spaces();
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                    }
                    Some(b'}') => {
                        self.pos += 1;
                        return Ok(Rule::Compound { all, children });
                    }
                    _ => {
                        return Err(RuleError::Syntax("missing closing brace".into()));
                    }
                }
            }
        } else {
            // Atom: word is the criterion name; an operator and a value
            // follow.
            let criterion = self
                .criteria
                .find(&word)
                .ok_or(RuleError::UnknownCriterion(word))?;
            self.skip_spaces();
            let op = MatchOp::parse(self.next_word())?;
            self.skip_spaces();
            let value_token = self.next_word().to_string();
            if value_token.is_empty() {
                return Err(RuleError::Syntax(format!(
                    "expected a value at offset {}",
                    self.pos
                )));
            }
            let c = self.criteria.get(criterion);
            let value = parse_value(c, &value_token).ok_or_else(|| RuleError::BadValue {
                criterion: c.name().to_string(),
                value: value_token,
            })?;
            Rule::matching(self.criteria, criterion, op, value)
        }
    }
}

fn parse_number(token: &str) -> Option<u32> {
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

/// Resolve an atom's value token: a declared literal, a `|`-joined literal
/// union (inclusive criteria, the form `dump` emits), `<none>` for the empty
/// mask, or a plain number.
fn parse_value(criterion: &crate::criteria::Criterion, token: &str) -> Option<u32> {
    if let Ok(v) = criterion.numerical(token) {
        return Some(v);
    }
    if criterion.is_inclusive() {
        if token == "<none>" {
            return Some(0);
        }
        if token.contains('|') {
            let mut mask = 0;
            for literal in token.split('|') {
                mask |= criterion.numerical(literal).ok()?;
            }
            return Some(mask);
        }
    }
    parse_number(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> Criteria {
        let mut criteria = Criteria::new();
        criteria
            .create_exclusive("Mode", &[(0, "Production"), (1, "Test")])
            .unwrap();
        criteria
            .create_inclusive("Flags", &[(1, "A"), (2, "B"), (4, "C")])
            .unwrap();
        criteria
    }

    #[test]
    fn empty_compounds_have_identity_semantics() {
        let criteria = criteria();
        assert!(Rule::all(vec![]).matches(&criteria));
        assert!(!Rule::any(vec![]).matches(&criteria));
    }

    #[test]
    fn is_and_isnot_track_exclusive_state() {
        let mut criteria = criteria();
        let mode = criteria.find("Mode").unwrap();
        let is_test = Rule::matching(&criteria, mode, MatchOp::Is, 1).unwrap();
        let not_test = Rule::matching(&criteria, mode, MatchOp::IsNot, 1).unwrap();

        assert!(!is_test.matches(&criteria));
        assert!(not_test.matches(&criteria));
        criteria.get_mut(mode).set_state(1).unwrap();
        assert!(is_test.matches(&criteria));
        assert!(!not_test.matches(&criteria));
    }

    #[test]
    fn includes_is_a_mask_intersection_test() {
        let mut criteria = criteria();
        let flags = criteria.find("Flags").unwrap();
        let includes_3 = Rule::matching(&criteria, flags, MatchOp::Includes, 3).unwrap();
        let excludes_3 = Rule::matching(&criteria, flags, MatchOp::Excludes, 3).unwrap();

        // {A, C} = 5: 5 & 3 = 1 ≠ 0.
        criteria.get_mut(flags).set_state(5).unwrap();
        assert!(includes_3.matches(&criteria));
        assert!(!excludes_3.matches(&criteria));

        // {C} = 4: 4 & 3 = 0.
        criteria.get_mut(flags).set_state(4).unwrap();
        assert!(!includes_3.matches(&criteria));
        assert!(excludes_3.matches(&criteria));
    }

    #[test]
    fn inclusive_operators_reject_exclusive_criteria() {
        let criteria = criteria();
        let mode = criteria.find("Mode").unwrap();
        assert!(matches!(
            Rule::matching(&criteria, mode, MatchOp::Includes, 1),
            Err(RuleError::OperatorKind { .. })
        ));
        assert!(matches!(
            Rule::parse("Mode Includes Test", &criteria),
            Err(RuleError::OperatorKind { .. })
        ));
    }

    #[test]
    fn parse_and_dump_round_trip() {
        let criteria = criteria();
        let text = "All{Mode Is Production, Any{Flags Includes A, Flags Excludes C}}";
        let rule = Rule::parse(text, &criteria).unwrap();
        assert_eq!(rule.dump(&criteria), text);

        // Whitespace is free between tokens.
        let spaced = Rule::parse(
            "  All {  Mode Is Production ,Any{ Flags Includes A,Flags Excludes C } } ",
            &criteria,
        )
        .unwrap();
        assert_eq!(spaced, rule);

        // A bare atom is a valid rule.
        let atom = Rule::parse("Mode IsNot Test", &criteria).unwrap();
        assert_eq!(atom.dump(&criteria), "Mode IsNot Test");

        // Numeric values survive, rendered back through the literal mapping
        // when they map exactly.
        let masked = Rule::parse("Flags Includes 3", &criteria).unwrap();
        assert!(matches!(
            masked,
            Rule::Match { value: 3, op: MatchOp::Includes, .. }
        ));
        assert_eq!(masked.dump(&criteria), "Flags Includes A|B");
        let reparsed = Rule::parse(&masked.dump(&criteria), &criteria).unwrap();
        assert_eq!(reparsed, masked);
    }

    #[test]
    fn syntax_errors_are_caught() {
        let criteria = criteria();
        assert!(matches!(
            Rule::parse("All{Mode Is Production", &criteria),
            Err(RuleError::Syntax(_))
        ));
        assert!(matches!(
            Rule::parse("Some{}", &criteria),
            Err(RuleError::UnknownCompound(_))
        ));
        assert!(matches!(
            Rule::parse("Bogus Is Production", &criteria),
            Err(RuleError::UnknownCriterion(_))
        ));
        assert!(matches!(
            Rule::parse("Mode Was Production", &criteria),
            Err(RuleError::UnknownOperator(_))
        ));
        assert!(matches!(
            Rule::parse("Mode Is Staging", &criteria),
            Err(RuleError::BadValue { .. })
        ));
        assert!(matches!(
            Rule::parse("All{} extra", &criteria),
            Err(RuleError::Syntax(_))
        ));
    }
}
