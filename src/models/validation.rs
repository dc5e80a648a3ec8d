use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 校验结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

/// 字段路径 -> 错误信息 (保持插入顺序)
///
/// 字段路径为扁平字段名 (`vendorName`) 或 `items[<i>].<field>`。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrorSet(IndexMap<String, String>);

impl ValidationErrorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.insert(path.into(), message.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// 一次校验的结果: 结论 + 错误集合
///
/// 不变量: `errors` 为空当且仅当 `validation_result == Pass`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub validation_result: Verdict,
    pub errors: ValidationErrorSet,
}

impl ValidationReport {
    /// 由错误集合推导结论
    pub fn from_errors(errors: ValidationErrorSet) -> Self {
        let validation_result = if errors.is_empty() { Verdict::Pass } else { Verdict::Fail };
        Self { validation_result, errors }
    }

    pub fn passed(&self) -> bool {
        self.validation_result == Verdict::Pass
    }
}

/// Case B 策略: 表单为空而发票上有值时如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingFieldPolicy {
    /// 报错，强制 fail
    Strict,
    /// 允许为空，不报错
    Lenient,
}

impl MissingFieldPolicy {
    pub fn from_strict_flag(strict_missing_field_policy: bool) -> Self {
        if strict_missing_field_policy {
            MissingFieldPolicy::Strict
        } else {
            MissingFieldPolicy::Lenient
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_verdict_follows_errors() {
        assert!(ValidationReport::from_errors(ValidationErrorSet::new()).passed());

        let mut errors = ValidationErrorSet::new();
        errors.insert("vendorName", "mismatch");
        let report = ValidationReport::from_errors(errors);
        assert_eq!(report.validation_result, Verdict::Fail);
    }

    #[test]
    fn report_serializes_like_model_reply() {
        let mut errors = ValidationErrorSet::new();
        errors.insert("items[0].quantity", "bad");
        let json = serde_json::to_value(ValidationReport::from_errors(errors)).unwrap();
        assert_eq!(json["validationResult"], "fail");
        assert_eq!(json["errors"]["items[0].quantity"], "bad");
    }
}
