use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::expense::Expense;
use crate::domain::workflow::{ConditionOperand, ConditionOperator, MatchCondition};

const DEFAULT_COUNT_GTE: u32 = 1;
const DEFAULT_COUNT_LTE: u32 = 0;
const DEFAULT_COUNT_EQUALS: u32 = 0;

/// Why a condition could not be evaluated. Defective conditions never match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionDefect {
    MissingDimension,
    UnrecognizedOperator { operator: String },
    MissingOperand { operator: String },
    OperandMismatch { operator: String },
}

impl ConditionDefect {
    pub fn describe(&self) -> String {
        match self {
            Self::MissingDimension => "condition has no dimension type".to_string(),
            Self::UnrecognizedOperator { operator } => {
                format!("operator `{operator}` is not recognized")
            }
            Self::MissingOperand { operator } => {
                format!("operator `{operator}` requires an operand")
            }
            Self::OperandMismatch { operator } => {
                format!("operand shape does not fit operator `{operator}`")
            }
        }
    }
}

/// Stateless predicates shared by the fast matcher and the diagnostic report.
pub struct CriteriaEvaluator;

impl CriteriaEvaluator {
    /// Evaluates one condition against the deduplicated dimension ids of its
    /// type. Defects are logged and evaluate to `false`.
    pub fn evaluate(condition: &MatchCondition, dimension_values: &BTreeSet<String>) -> bool {
        match Self::check(condition, dimension_values) {
            Ok(matched) => matched,
            Err(defect) => {
                tracing::warn!(
                    event_name = "approval.configuration_defect",
                    condition = %condition.label(),
                    defect = %defect.describe(),
                    "match condition cannot be evaluated; treating as non-matching"
                );
                false
            }
        }
    }

    /// Evaluates a condition against an expense, resolving the observed values
    /// for the condition's dimension type first.
    pub fn evaluate_for_expense(condition: &MatchCondition, expense: &Expense) -> bool {
        Self::evaluate(condition, &Self::observed_values(condition, expense))
    }

    pub fn observed_values(condition: &MatchCondition, expense: &Expense) -> BTreeSet<String> {
        condition
            .dimension_type
            .map(|dimension_type| expense.dimension_values(dimension_type))
            .unwrap_or_default()
    }

    pub fn check(
        condition: &MatchCondition,
        values: &BTreeSet<String>,
    ) -> Result<bool, ConditionDefect> {
        if condition.dimension_type.is_none() {
            return Err(ConditionDefect::MissingDimension);
        }

        let operator = &condition.operator;
        let operand = &condition.operand;
        match operator {
            ConditionOperator::HasAny => Ok(!values.is_empty()),
            ConditionOperator::HasNone => Ok(values.is_empty()),
            ConditionOperator::Equals => {
                single_value(operator, operand).map(|value| values.contains(value))
            }
            ConditionOperator::NotEquals => {
                single_value(operator, operand).map(|v| !values.contains(v))
            }
            ConditionOperator::In => {
                let list = value_list(operator, operand)?;
                Ok(!list.is_empty() && list.iter().any(|value| values.contains(value)))
            }
            ConditionOperator::NotIn => {
                let list = value_list(operator, operand)?;
                Ok(!list.is_empty() && list.iter().all(|value| !values.contains(value)))
            }
            ConditionOperator::CountGte => {
                count(operator, operand, DEFAULT_COUNT_GTE).map(|n| values.len() >= n as usize)
            }
            ConditionOperator::CountLte => {
                count(operator, operand, DEFAULT_COUNT_LTE).map(|n| values.len() <= n as usize)
            }
            ConditionOperator::CountEquals => {
                count(operator, operand, DEFAULT_COUNT_EQUALS).map(|n| values.len() == n as usize)
            }
            ConditionOperator::Unrecognized(raw) => {
                Err(ConditionDefect::UnrecognizedOperator { operator: raw.clone() })
            }
        }
    }

    /// Inclusive range check; an absent bound is unbounded.
    pub fn amount_in_range(amount: Decimal, min: Option<Decimal>, max: Option<Decimal>) -> bool {
        min.map_or(true, |min| amount >= min) && max.map_or(true, |max| amount <= max)
    }
}

fn single_value<'a>(
    operator: &ConditionOperator,
    operand: &'a ConditionOperand,
) -> Result<&'a str, ConditionDefect> {
    match operand {
        ConditionOperand::Value(value) => Ok(value.as_str()),
        ConditionOperand::None => {
            Err(ConditionDefect::MissingOperand { operator: operator.as_str().to_string() })
        }
        _ => Err(ConditionDefect::OperandMismatch { operator: operator.as_str().to_string() }),
    }
}

fn value_list<'a>(
    operator: &ConditionOperator,
    operand: &'a ConditionOperand,
) -> Result<&'a [String], ConditionDefect> {
    match operand {
        ConditionOperand::Values(values) => Ok(values.as_slice()),
        ConditionOperand::Value(value) => Ok(std::slice::from_ref(value)),
        ConditionOperand::None => Ok(&[]),
        ConditionOperand::Count(_) => {
            Err(ConditionDefect::OperandMismatch { operator: operator.as_str().to_string() })
        }
    }
}

fn count(
    operator: &ConditionOperator,
    operand: &ConditionOperand,
    default: u32,
) -> Result<u32, ConditionDefect> {
    match operand {
        ConditionOperand::Count(count) => Ok(*count),
        ConditionOperand::None => Ok(default),
        _ => Err(ConditionDefect::OperandMismatch { operator: operator.as_str().to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rust_decimal::Decimal;

    use super::{ConditionDefect, CriteriaEvaluator};
    use crate::domain::expense::DimensionType;
    use crate::domain::workflow::{ConditionOperand, ConditionOperator, MatchCondition};

    fn values(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn condition(operator: ConditionOperator, operand: ConditionOperand) -> MatchCondition {
        MatchCondition::new(DimensionType::Project, operator, operand)
    }

    fn list(items: &[&str]) -> ConditionOperand {
        ConditionOperand::Values(items.iter().map(|item| item.to_string()).collect())
    }

    #[test]
    fn operator_semantics_table() {
        let one = values(&["P-1"]);
        let two = values(&["P-1", "P-2"]);
        let none = values(&[]);
        let value = |v: &str| ConditionOperand::Value(v.to_string());

        let cases: Vec<(ConditionOperator, ConditionOperand, &BTreeSet<String>, bool)> = vec![
            (ConditionOperator::HasAny, ConditionOperand::None, &one, true),
            (ConditionOperator::HasAny, ConditionOperand::None, &none, false),
            (ConditionOperator::HasNone, ConditionOperand::None, &none, true),
            (ConditionOperator::HasNone, ConditionOperand::None, &one, false),
            (ConditionOperator::Equals, value("P-1"), &two, true),
            (ConditionOperator::Equals, value("P-9"), &two, false),
            (ConditionOperator::NotEquals, value("P-9"), &two, true),
            (ConditionOperator::NotEquals, value("P-2"), &two, false),
            (ConditionOperator::In, list(&["P-2", "P-7"]), &two, true),
            (ConditionOperator::In, list(&["P-7"]), &two, false),
            (ConditionOperator::NotIn, list(&["P-7"]), &two, true),
            (ConditionOperator::NotIn, list(&["P-2"]), &two, false),
            (ConditionOperator::CountGte, ConditionOperand::Count(2), &two, true),
            (ConditionOperator::CountGte, ConditionOperand::Count(3), &two, false),
            (ConditionOperator::CountLte, ConditionOperand::Count(1), &one, true),
            (ConditionOperator::CountLte, ConditionOperand::Count(1), &two, false),
            (ConditionOperator::CountEquals, ConditionOperand::Count(2), &two, true),
            (ConditionOperator::CountEquals, ConditionOperand::Count(1), &two, false),
        ];

        for (operator, operand, observed, expected) in cases {
            let label = format!("{} {:?}", operator.as_str(), operand);
            let condition = condition(operator, operand);
            assert_eq!(CriteriaEvaluator::evaluate(&condition, observed), expected, "{label}");
        }
    }

    #[test]
    fn empty_operand_list_never_matches_in_or_not_in() {
        let observed = values(&["P-1"]);
        let empty = values(&[]);

        for operator in [ConditionOperator::In, ConditionOperator::NotIn] {
            for operand in [list(&[]), ConditionOperand::None] {
                let condition = condition(operator.clone(), operand);
                assert!(!CriteriaEvaluator::evaluate(&condition, &observed));
                assert!(!CriteriaEvaluator::evaluate(&condition, &empty));
            }
        }
    }

    #[test]
    fn count_operators_fall_back_to_defaults() {
        let empty = values(&[]);
        let one = values(&["P-1"]);

        let gte = condition(ConditionOperator::CountGte, ConditionOperand::None);
        assert!(CriteriaEvaluator::evaluate(&gte, &one));
        assert!(!CriteriaEvaluator::evaluate(&gte, &empty));

        let lte = condition(ConditionOperator::CountLte, ConditionOperand::None);
        assert!(CriteriaEvaluator::evaluate(&lte, &empty));
        assert!(!CriteriaEvaluator::evaluate(&lte, &one));

        let equals = condition(ConditionOperator::CountEquals, ConditionOperand::None);
        assert!(CriteriaEvaluator::evaluate(&equals, &empty));
        assert!(!CriteriaEvaluator::evaluate(&equals, &one));
    }

    #[test]
    fn missing_value_operand_is_a_defect() {
        let observed = values(&["P-1"]);
        for operator in [ConditionOperator::Equals, ConditionOperator::NotEquals] {
            let condition = condition(operator.clone(), ConditionOperand::None);
            assert_eq!(
                CriteriaEvaluator::check(&condition, &observed),
                Err(ConditionDefect::MissingOperand { operator: operator.as_str().to_string() })
            );
            assert!(!CriteriaEvaluator::evaluate(&condition, &observed));
        }
    }

    #[test]
    fn missing_dimension_and_unknown_operator_fail_closed() {
        let observed = values(&[]);
        let no_dimension = MatchCondition {
            dimension_type: None,
            operator: ConditionOperator::HasNone,
            operand: ConditionOperand::None,
        };
        assert_eq!(
            CriteriaEvaluator::check(&no_dimension, &observed),
            Err(ConditionDefect::MissingDimension)
        );
        assert!(!CriteriaEvaluator::evaluate(&no_dimension, &observed));

        let unknown = condition(
            ConditionOperator::Unrecognized("matches_regex".to_string()),
            ConditionOperand::None,
        );
        assert!(!CriteriaEvaluator::evaluate(&unknown, &observed));
    }

    #[test]
    fn amount_range_is_inclusive_and_open_when_unbounded() {
        let min = Some(Decimal::new(1000, 0));
        let max = Some(Decimal::new(5000, 0));

        assert!(CriteriaEvaluator::amount_in_range(Decimal::new(1000, 0), min, max));
        assert!(CriteriaEvaluator::amount_in_range(Decimal::new(5000, 0), min, max));
        assert!(!CriteriaEvaluator::amount_in_range(Decimal::new(99999, 2), min, max));
        assert!(!CriteriaEvaluator::amount_in_range(Decimal::new(500001, 2), min, max));
        assert!(CriteriaEvaluator::amount_in_range(Decimal::new(1, 0), None, max));
        assert!(CriteriaEvaluator::amount_in_range(Decimal::new(1_000_000, 0), min, None));
        assert!(CriteriaEvaluator::amount_in_range(Decimal::ZERO, None, None));
    }
}
