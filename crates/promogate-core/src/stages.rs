use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const WAIT_STAGE: &str = "wait";
pub const PRECONDITION_STAGE: &str = "checkPreconditions";
const FORCED_FAILURE_NAME: &str = "dryrun fail";

/// One stage of a remote job, in the shape the task backend expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl StageDescriptor {
    pub fn new(kind: &str, context: Value) -> Self {
        let context = match context {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        Self {
            kind: kind.to_string(),
            context,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.context.get("name").and_then(|v| v.as_str())
    }

    /// Seconds a wait stage holds the job, zero for any other stage.
    pub fn wait_seconds(&self) -> u64 {
        if self.kind != WAIT_STAGE {
            return 0;
        }
        self.context
            .get("waitTime")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// True for a precondition stage whose expression can never hold.
    pub fn is_forced_failure(&self) -> bool {
        if self.kind != PRECONDITION_STAGE {
            return false;
        }
        let Some(preconditions) = self.context.get("preconditions").and_then(|v| v.as_array())
        else {
            return false;
        };
        preconditions.iter().any(|p| {
            p.pointer("/context/expression").and_then(|e| e.as_str()) == Some("false")
                && p.get("failPipeline").and_then(|f| f.as_bool()).unwrap_or(false)
        })
    }
}

/// Stages for a dry-run job: wait for `wait_time` (skipped when zero), then
/// optionally fail the job.
///
/// An empty list means there is no remote work to do.
pub fn dry_run_stages(name: &str, wait_time: Duration, fail: bool) -> Vec<StageDescriptor> {
    let mut stages = Vec::new();

    if !wait_time.is_zero() {
        stages.push(StageDescriptor::new(
            WAIT_STAGE,
            json!({
                "name": name,
                "waitTime": wait_time.as_secs(),
            }),
        ));
    }

    if fail {
        stages.push(StageDescriptor::new(
            PRECONDITION_STAGE,
            json!({
                "name": FORCED_FAILURE_NAME,
                "preconditions": [
                    {
                        "context": { "expression": "false" },
                        "failPipeline": true,
                        "type": "expression",
                    }
                ],
            }),
        ));
    }

    stages
}
