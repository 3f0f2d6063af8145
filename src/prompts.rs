//! Interactive Prompt Rules
//!
//! Each calibration kind has an ordered table of prompt patterns with the
//! response to send when nobody answers. The first matching rule wins.

use regex::Regex;

use crate::config::ExtraPromptRule;
use crate::error::Result;
use crate::models::CalibrationKind;

/// Zero-point prompts and their default answers
const ZERO_POINT_RULES: &[(&str, &str)] = &[
    (r"是否启动机器人控制系统.*[(（][yY]/[nN][)）][:：]?", "y"),
    (r"按.*[oO].*启动机器人", "o"),
    (r"是否开始标定", "y"),
    (r"请确认.*是否正确", "y"),
    (r"是否保存标定结果", "y"),
    (r"确认.*[(（][yY]/[nN][)）]", "y"),
    (r"继续.*[(（][yY]/[nN][)）]", "y"),
    (r"(?i)press\s+'?o'?\s+to\s+start", "o"),
    (r"(?i)(save|confirm|continue|start)\b.*\(y/n\)", "y"),
];

/// Head and hand prompts; an empty response sends a bare Enter
const HEAD_HAND_RULES: &[(&str, &str)] = &[
    (r"是否开始一键标定流程", "y"),
    (r"是否启动机器人控制系统", "y"),
    (r"请确认机器人已经上电.*回车继续", ""),
    (r"机器人将开始运动.*是否继续", "y"),
    (r"是否继续头部标定", "y"),
    (r"标定完成.*按任意键退出", ""),
    (r"按回车键继续", ""),
    (r"(?i)(按|press\s+)enter(键)?\s*(继续|to continue)", ""),
];

/// A prompt pattern and the answer used when no operator responds
#[derive(Debug, Clone)]
pub struct PromptRule {
    pattern: Regex,
    default_response: String,
}

impl PromptRule {
    pub fn new(pattern: &str, default_response: impl Into<String>) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            default_response: default_response.into(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn default_response(&self) -> &str {
        &self.default_response
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Ordered prompt rules for one calibration kind
#[derive(Debug, Clone)]
pub struct PromptRuleSet {
    rules: Vec<PromptRule>,
}

impl PromptRuleSet {
    fn from_table(table: &[(&str, &str)]) -> Self {
        let rules = table
            .iter()
            .filter_map(|(pattern, response)| match PromptRule::new(pattern, *response) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    error!("Skipping invalid built-in prompt rule '{}': {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn zero_point() -> Self {
        Self::from_table(ZERO_POINT_RULES)
    }

    pub fn head_hand() -> Self {
        Self::from_table(HEAD_HAND_RULES)
    }

    /// Built-in rules for `kind`, followed by any matching configured rules
    pub fn for_kind(kind: CalibrationKind, extra: &[ExtraPromptRule]) -> Result<Self> {
        let mut set = match kind {
            CalibrationKind::ZeroPoint { .. } => Self::zero_point(),
            CalibrationKind::HeadHand => Self::head_hand(),
        };
        for rule in extra {
            let applies = rule
                .kind
                .as_deref()
                .map_or(true, |k| k == kind.type_label());
            if applies {
                set.rules.push(PromptRule::new(&rule.pattern, rule.response.clone())?);
            }
        }
        Ok(set)
    }

    /// First rule matching `text`, in priority order
    pub fn detect(&self, text: &str) -> Option<&PromptRule> {
        if text.trim().is_empty() {
            return None;
        }
        self.rules.iter().find(|rule| rule.is_match(text))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
