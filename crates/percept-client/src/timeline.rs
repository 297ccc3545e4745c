//! Timeline reshaping: expanding instruction wrappers and practice blocks,
//! and spreading a filler trial through an existing timeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{PerceptError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialBlock(Value);

impl TrialBlock {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn has_practice(&self) -> bool {
        self.0.get("has_practice").map(is_truthy).unwrap_or(false)
    }

    pub fn is_practice(&self) -> bool {
        self.0.get("is_practice").map(is_truthy).unwrap_or(false)
    }

    pub fn instructions_before(&self) -> Option<TrialBlock> {
        self.instruction("before")
    }

    pub fn instructions_after(&self) -> Option<TrialBlock> {
        self.instruction("after")
    }

    fn instruction(&self, slot: &str) -> Option<TrialBlock> {
        let instructions = self.0.get("instructions").filter(|v| is_truthy(v))?;
        instructions
            .get(slot)
            .filter(|v| is_truthy(v))
            .cloned()
            .map(TrialBlock)
    }

    fn mark_practice(&mut self) {
        if let Value::Object(map) = &mut self.0 {
            map.insert("is_practice".to_string(), Value::Bool(true));
        }
    }
}

impl From<Value> for TrialBlock {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn unpack<F>(timeline: &[TrialBlock], mut handler: Option<F>) -> Vec<TrialBlock>
where
    F: FnMut(&mut TrialBlock),
{
    let mut out = Vec::with_capacity(timeline.len());
    for block in timeline {
        if let Some(before) = block.instructions_before() {
            out.push(before);
        }
        if block.has_practice() {
            let mut practice = block.clone();
            practice.mark_practice();
            if let Some(handler) = handler.as_mut() {
                handler(&mut practice);
            }
            out.push(practice);
            if let Some(after) = block.instructions_after() {
                out.push(after);
            }
            out.push(block.clone());
        } else {
            out.push(block.clone());
            if let Some(after) = block.instructions_after() {
                out.push(after);
            }
        }
    }
    debug!(input = timeline.len(), output = out.len(), "timeline unpacked");
    out
}

pub fn unpack_plain(timeline: &[TrialBlock]) -> Vec<TrialBlock> {
    unpack::<fn(&mut TrialBlock)>(timeline, None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntersperseMode {
    #[default]
    Centered,
    Edge,
}

impl IntersperseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            IntersperseMode::Centered => "centered",
            IntersperseMode::Edge => "edge",
        }
    }
}

impl fmt::Display for IntersperseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntersperseMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "centered" {
            Ok(IntersperseMode::Centered)
        } else {
            Ok(IntersperseMode::Edge)
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterspersalRequest {
    pub trial: TrialBlock,
    pub reps: usize,
    pub timeline: Vec<TrialBlock>,
    pub mode: IntersperseMode,
}

pub fn intersperse(request: &InterspersalRequest) -> Result<Vec<TrialBlock>> {
    let len = request.timeline.len();
    let reps = request.reps;
    if reps > len {
        return Err(PerceptError::InvalidInterspersal { reps, len });
    }
    let mut timeline = request.timeline.clone();
    if reps == 0 {
        return Ok(timeline);
    }

    let (gap, start) = match request.mode {
        IntersperseMode::Centered => {
            let gap = len / (reps + 1);
            (gap, gap)
        }
        // a single edge copy has no spacing to compute
        IntersperseMode::Edge if reps == 1 => (0, 0),
        IntersperseMode::Edge => (len / (reps - 1), 0),
    };

    let mut index = start;
    for _ in 0..reps {
        let at = index.min(timeline.len());
        timeline.insert(at, request.trial.clone());
        index += gap + 1;
    }
    debug!(
        reps,
        gap,
        mode = %request.mode,
        output = timeline.len(),
        "trial interspersed"
    );
    Ok(timeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocks(values: Vec<Value>) -> Vec<TrialBlock> {
        values.into_iter().map(TrialBlock::new).collect()
    }

    fn numbered(n: usize) -> Vec<TrialBlock> {
        (0..n).map(|i| TrialBlock::new(json!({ "id": i }))).collect()
    }

    fn filler() -> TrialBlock {
        TrialBlock::new(json!({ "type": "pause" }))
    }

    fn filler_positions(timeline: &[TrialBlock]) -> Vec<usize> {
        timeline
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == filler())
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn unpack_is_identity_without_instructions_or_practice() {
        let input = blocks(vec![
            json!({"type": "text", "text": "hello"}),
            json!({"type": "single-stim", "has_practice": false}),
            json!("bare string"),
            json!(42),
        ]);
        let out = unpack_plain(&input);
        assert_eq!(out, input);
    }

    #[test]
    fn unpack_places_before_instructions_ahead_of_block() {
        let input = blocks(vec![
            json!({"id": "a"}),
            json!({"id": "b", "instructions": {"before": {"id": "intro"}}}),
        ]);
        let out = unpack_plain(&input);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].as_value(), &json!({"id": "intro"}));
        assert_eq!(out[2], input[1]);
    }

    #[test]
    fn unpack_places_after_instructions_behind_block() {
        let input = blocks(vec![json!({"id": "a", "instructions": {"after": {"id": "outro"}}})]);
        let out = unpack_plain(&input);
        assert_eq!(out, vec![input[0].clone(), TrialBlock::new(json!({"id": "outro"}))]);
    }

    #[test]
    fn unpack_practice_puts_after_instructions_between_copies() {
        let block = json!({"has_practice": true, "instructions": {"after": {"id": "Y"}}});
        let input = blocks(vec![block.clone()]);
        let out = unpack_plain(&input);
        assert_eq!(out.len(), 3);

        let mut expected_practice = block.clone();
        expected_practice["is_practice"] = json!(true);
        assert_eq!(out[0].as_value(), &expected_practice);
        assert!(out[0].is_practice());
        assert_eq!(out[1].as_value(), &json!({"id": "Y"}));
        assert_eq!(out[2].as_value(), &block);
        assert!(!out[2].is_practice());
    }

    #[test]
    fn unpack_practice_with_both_instructions() {
        let block = json!({
            "id": "main",
            "has_practice": 1,
            "instructions": {"before": "B", "after": "A"}
        });
        let out = unpack_plain(&blocks(vec![block]));
        let ids: Vec<Value> = out
            .iter()
            .map(|b| b.as_value().get("id").cloned().unwrap_or_else(|| b.as_value().clone()))
            .collect();
        assert_eq!(ids, vec![json!("B"), json!("main"), json!("A"), json!("main")]);
        assert!(out[1].is_practice());
    }

    #[test]
    fn unpack_handler_mutates_only_the_practice_copy() {
        let input = blocks(vec![json!({"has_practice": true, "trials": [1, 2, 3]})]);
        let out = unpack(
            &input,
            Some(|practice: &mut TrialBlock| {
                practice.as_value_mut()["trials"] = json!([1]);
            }),
        );
        assert_eq!(out[0].as_value()["trials"], json!([1]));
        assert_eq!(out[1].as_value()["trials"], json!([1, 2, 3]));
        assert_eq!(input[0].as_value()["trials"], json!([1, 2, 3]));
    }

    #[test]
    fn unpack_practice_copy_is_deep() {
        let input = blocks(vec![json!({"has_practice": true, "nested": {"list": [1]}})]);
        let out = unpack(
            &input,
            Some(|practice: &mut TrialBlock| {
                practice.as_value_mut()["nested"]["list"] = json!([9]);
            }),
        );
        assert_eq!(out[1].as_value()["nested"]["list"], json!([1]));
    }

    #[test]
    fn unpack_ignores_malformed_instruction_fields() {
        let input = blocks(vec![
            json!({"id": 1, "instructions": "not an object"}),
            json!({"id": 2, "instructions": null}),
            json!({"id": 3, "instructions": {"before": null, "after": ""}}),
            json!({"id": 4, "has_practice": "", "instructions": {}}),
        ]);
        assert_eq!(unpack_plain(&input), input);
    }

    #[test]
    fn intersperse_centered_accounts_for_prior_insertions() {
        let out = intersperse(&InterspersalRequest {
            trial: filler(),
            reps: 2,
            timeline: numbered(9),
            mode: IntersperseMode::Centered,
        })
        .expect("intersperse");
        assert_eq!(out.len(), 11);
        assert_eq!(filler_positions(&out), vec![3, 7]);
    }

    #[test]
    fn intersperse_edge_starts_at_zero() {
        let out = intersperse(&InterspersalRequest {
            trial: filler(),
            reps: 3,
            timeline: numbered(8),
            mode: IntersperseMode::Edge,
        })
        .expect("intersperse");
        // gap = 8 / 2 = 4
        assert_eq!(out.len(), 11);
        assert_eq!(filler_positions(&out), vec![0, 5, 10]);
    }

    #[test]
    fn intersperse_edge_single_copy_goes_first() {
        let base = numbered(5);
        let out = intersperse(&InterspersalRequest {
            trial: filler(),
            reps: 1,
            timeline: base.clone(),
            mode: IntersperseMode::Edge,
        })
        .expect("intersperse");
        assert_eq!(filler_positions(&out), vec![0]);
        assert_eq!(&out[1..], &base[..]);
    }

    #[test]
    fn intersperse_keeps_base_order_and_input() {
        let base = numbered(6);
        let out = intersperse(&InterspersalRequest {
            trial: filler(),
            reps: 2,
            timeline: base.clone(),
            mode: IntersperseMode::Centered,
        })
        .expect("intersperse");
        let rest: Vec<TrialBlock> = out.into_iter().filter(|b| *b != filler()).collect();
        assert_eq!(rest, base);
        assert_eq!(base.len(), 6);
    }

    #[test]
    fn intersperse_full_length_stays_in_bounds() {
        for len in 1..12 {
            for mode in [IntersperseMode::Centered, IntersperseMode::Edge] {
                let out = intersperse(&InterspersalRequest {
                    trial: filler(),
                    reps: len,
                    timeline: numbered(len),
                    mode,
                })
                .expect("reps == len is allowed");
                assert_eq!(out.len(), len * 2, "len {} mode {}", len, mode);
            }
        }
    }

    #[test]
    fn intersperse_rejects_more_reps_than_trials() {
        for len in 0..6 {
            for mode in [IntersperseMode::Centered, IntersperseMode::Edge] {
                let err = intersperse(&InterspersalRequest {
                    trial: filler(),
                    reps: len + 1,
                    timeline: numbered(len),
                    mode,
                })
                .expect_err("must fail");
                assert!(matches!(
                    err,
                    PerceptError::InvalidInterspersal { reps, len: l } if reps == len + 1 && l == len
                ));
            }
        }
    }

    #[test]
    fn intersperse_zero_reps_returns_copy() {
        let base = numbered(3);
        let out = intersperse(&InterspersalRequest {
            trial: filler(),
            reps: 0,
            timeline: base.clone(),
            mode: IntersperseMode::Edge,
        })
        .expect("intersperse");
        assert_eq!(out, base);
    }

    #[test]
    fn mode_parses_anything_else_as_edge() {
        assert_eq!("centered".parse::<IntersperseMode>(), Ok(IntersperseMode::Centered));
        assert_eq!("edge".parse::<IntersperseMode>(), Ok(IntersperseMode::Edge));
        assert_eq!("sides".parse::<IntersperseMode>(), Ok(IntersperseMode::Edge));
        assert_eq!(IntersperseMode::default(), IntersperseMode::Centered);
    }
}
