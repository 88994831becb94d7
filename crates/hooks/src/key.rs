use std::fmt;
use std::str::FromStr;

use crossrun_core_types::{RelayError, ToolPath};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Stage {
    Before,
    After,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Before => "before",
            Stage::After => "after",
        }
    }
}

/// `before.tool`, `after.input`, `before.input.click` and so on.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct HookKey {
    stage: Stage,
    target: String,
}

impl HookKey {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// `tool`, a namespace, or a full tool path.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Keys consulted for one stage of a call to `path`, in run order.
    pub fn for_call(path: &ToolPath, stage: Stage) -> Vec<HookKey> {
        let mut keys: Vec<HookKey> = path
            .hook_keys(stage.as_str())
            .into_iter()
            .filter_map(|raw| raw.parse().ok())
            .collect();
        if stage == Stage::After {
            keys.reverse();
        }
        keys
    }
}

impl FromStr for HookKey {
    type Err = RelayError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || RelayError::InvalidHook(format!("invalid hook key {raw:?}"));
        let (stage, target) = raw.trim().split_once('.').ok_or_else(invalid)?;
        let stage = match stage {
            "before" => Stage::Before,
            "after" => Stage::After,
            _ => return Err(invalid()),
        };
        target.parse::<ToolPath>().map_err(|_| invalid())?;
        Ok(Self {
            stage,
            target: target.to_string(),
        })
    }
}

impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage.as_str(), self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_levels() {
        for raw in ["before.tool", "after.input", "before.input.click"] {
            let key: HookKey = raw.parse().unwrap();
            assert_eq!(key.to_string(), raw);
        }
    }

    #[test]
    fn unknown_stage_is_a_hook_error() {
        let err = "during.input.click".parse::<HookKey>().unwrap_err();
        assert_eq!(err.name(), "HookError");
        assert!("before".parse::<HookKey>().is_err());
        assert!("before.a.b.c".parse::<HookKey>().is_err());
    }

    #[test]
    fn after_keys_run_innermost_first() {
        let path: ToolPath = "input.click".parse().unwrap();
        let before: Vec<String> = HookKey::for_call(&path, Stage::Before)
            .iter()
            .map(ToString::to_string)
            .collect();
        let after: Vec<String> = HookKey::for_call(&path, Stage::After)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(before, ["before.tool", "before.input", "before.input.click"]);
        assert_eq!(after, ["after.input.click", "after.input", "after.tool"]);
    }
}
