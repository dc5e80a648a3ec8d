use crate::config::ValidationMode;
use crate::error::ExtractError;
use crate::models::{
    InvoiceRecord, MissingFieldPolicy, ValidationErrorSet, ValidationReport, Verdict,
};
use crate::service::model::{ImagePayload, VisionModel, VisionRequest};
use crate::service::normalizer::normalize;
use crate::service::reconciler::Reconciler;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const EXTRACTION_PROMPT: &str = r#"You are an invoice data extraction assistant.
Read the attached invoice image and return ONLY a JSON object with these keys:
{
  "invoiceNumber": "string",
  "invoiceDate": "YYYY-MM-DD",
  "dueDate": "YYYY-MM-DD",
  "vendor": { "name": "string", "email": "string", "address": "string" },
  "customer": { "name": "string", "address": "string" },
  "items": [
    { "description": "string", "quantity": number, "unitPrice": number, "amount": number }
  ],
  "subtotal": number,
  "tax": number,
  "total": number
}
Use an empty string or 0 for anything not visible on the invoice. Do not guess.
Return ONLY the JSON object, no markdown fences, no commentary."#;

const RULE_B_STRICT: &str = "Rule B (Required Field Missing in Form): if a form field is empty or zero and you extract ANY value for it from the invoice, you MUST report an error stating the missing field and the expected value from the invoice.";
const RULE_B_LENIENT: &str = "Rule B (Field Left Empty in Form): if a form field is empty or zero, do NOT report an error, even when the invoice shows a value for it.";

/// 模型返回的校验结果 (model 模式)
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelValidationReply {
    #[serde(default)]
    validation_result: Option<String>,
    #[serde(default)]
    errors: Option<Value>,
}

/// 发票提取与校验服务
///
/// 模型输出一律视为不可信: 先从文本中取出 JSON，再经过归一化/比对。
pub struct InvoiceService {
    model: Arc<dyn VisionModel>,
    reconciler: Reconciler,
    mode: ValidationMode,
}

impl InvoiceService {
    pub fn new(model: Arc<dyn VisionModel>, policy: MissingFieldPolicy, mode: ValidationMode) -> Self {
        Self {
            model,
            reconciler: Reconciler::new(policy),
            mode,
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// 提取发票字段并归一化
    ///
    /// `form` 为用户当前表单值，仅作为提示附在提示词后。
    pub async fn extract(
        &self,
        image: ImagePayload,
        form: Option<&InvoiceRecord>,
    ) -> Result<InvoiceRecord, ExtractError> {
        image.ensure_supported()?;

        let prompt = match form {
            Some(form) => format!(
                "{}\n\nThe user's current form values are below. They may be incomplete or wrong; always report what the invoice image shows.\n{}",
                EXTRACTION_PROMPT,
                serde_json::to_string_pretty(form)?
            ),
            None => EXTRACTION_PROMPT.to_string(),
        };

        let raw = self.call_model(prompt, image).await?;
        let record = normalize(&raw);
        info!(
            model = self.model.name(),
            items = record.items.len(),
            invoice_number = %record.invoice_number,
            "Extraction normalized"
        );
        Ok(record)
    }

    /// 校验用户表单
    pub async fn validate(
        &self,
        form: &InvoiceRecord,
        image: ImagePayload,
    ) -> Result<ValidationReport, ExtractError> {
        image.ensure_supported()?;

        let report = match self.mode {
            ValidationMode::Local => {
                let raw = self.call_model(EXTRACTION_PROMPT.to_string(), image).await?;
                let extracted = normalize(&raw);
                self.reconciler.reconcile(form, &extracted)
            }
            ValidationMode::Model => {
                let prompt = validation_prompt(form, self.reconciler.policy())?;
                let raw = self.call_model(prompt, image).await?;
                report_from_model_reply(raw)
            }
        };

        info!(
            mode = ?self.mode,
            verdict = ?report.validation_result,
            errors = report.errors.len(),
            "Validation finished"
        );
        Ok(report)
    }

    async fn call_model(&self, prompt: String, image: ImagePayload) -> Result<Value, ExtractError> {
        let text = self.model.complete(VisionRequest { prompt, image }).await?;
        debug!(raw = %text, "Model reply");
        parse_model_json(&text)
    }
}

/// 从模型文本中取出第一个 JSON 对象并解析
pub fn parse_model_json(text: &str) -> Result<Value, ExtractError> {
    let trimmed = strip_code_fence(text.trim());
    let block = first_json_object(trimmed).ok_or_else(|| ExtractError::NoJsonObject {
        raw: text.to_string(),
    })?;
    Ok(serde_json::from_str(block)?)
}

fn strip_code_fence(s: &str) -> &str {
    s.trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// 第一个括号平衡的 `{...}` 片段 (识别字符串与转义)
pub fn first_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in s[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn validation_prompt(form: &InvoiceRecord, policy: MissingFieldPolicy) -> Result<String, ExtractError> {
    let rule_b = match policy {
        MissingFieldPolicy::Strict => RULE_B_STRICT,
        MissingFieldPolicy::Lenient => RULE_B_LENIENT,
    };

    Ok(format!(
        r#"You are an invoice validator. Compare the user's form data with the data visible in the attached invoice image.
Return ONLY a JSON object with two keys: "validationResult" ("pass" or "fail") and "errors" (an object mapping field names to messages).

Date fields (invoiceDate, dueDate): convert the invoice value to YYYY-MM-DD before comparing (e.g. "January 15, 2022" becomes "2022-01-15").
Line item fields use keys like "items[0].quantity".

Rule A (Value Mismatch): if a form field has a non-empty, non-zero value, the invoice shows a value for it, and the two differ, report an error that names the correct value from the invoice.
{rule_b}
Rule C (Invoice Data Missing): if a field is not present on the invoice, do NOT report an error, whatever the form says.

Set "validationResult" to "fail" when any error is reported. When it is "pass", "errors" must be {{}}.

The user-submitted form data is:
{form}"#,
        rule_b = rule_b,
        form = serde_json::to_string_pretty(form)?
    ))
}

/// 把模型给出的 `{validationResult, errors}` 整理为报告，并保证 "错误为空 <=> pass"
fn report_from_model_reply(raw: Value) -> ValidationReport {
    let reply: ModelValidationReply = match serde_json::from_value(raw) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Unexpected validation reply shape");
            ModelValidationReply { validation_result: Some("fail".to_string()), errors: None }
        }
    };

    let mut errors = ValidationErrorSet::new();
    if let Some(Value::Object(map)) = reply.errors {
        for (path, message) in map {
            match message {
                Value::Null => continue,
                Value::String(s) if s.trim().is_empty() => continue,
                Value::String(s) => errors.insert(path, s),
                other => errors.insert(path, other.to_string()),
            }
        }
    }

    let said_fail = reply
        .validation_result
        .map(|v| v.trim().eq_ignore_ascii_case("fail"))
        .unwrap_or(false);

    if said_fail && errors.is_empty() {
        errors.insert("invoice", "Validation failed but the model did not name any field.");
    }

    let report = ValidationReport::from_errors(errors);
    debug_assert_eq!(report.validation_result == Verdict::Pass, report.errors.is_empty());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_object_inside_prose() {
        let text = "Sure! Here is the data:\n{\"a\": {\"b\": 1}} and more {\"c\": 2}";
        assert_eq!(first_json_object(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"note": "use } and { freely", "esc": "quote \" }"} trailing"#;
        assert_eq!(
            first_json_object(text),
            Some(r#"{"note": "use } and { freely", "esc": "quote \" }"}"#)
        );
    }

    #[test]
    fn unbalanced_or_missing_object() {
        assert_eq!(first_json_object("no json here"), None);
        assert_eq!(first_json_object("{\"a\": 1"), None);
    }

    #[test]
    fn parse_strips_fences() {
        let value = parse_model_json("```json\n{\"total\": 5}\n```").unwrap();
        assert_eq!(value["total"], 5);
    }

    #[test]
    fn parse_reports_raw_text_when_no_object() {
        match parse_model_json("I cannot read this image.") {
            Err(ExtractError::NoJsonObject { raw }) => assert_eq!(raw, "I cannot read this image."),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn model_reply_pass() {
        let report = report_from_model_reply(json!({"validationResult": "pass", "errors": {}}));
        assert!(report.passed());
    }

    #[test]
    fn model_reply_errors_force_fail() {
        let report = report_from_model_reply(json!({
            "validationResult": "pass",
            "errors": {"vendorName": "Expected Acme Corp", "total": 12, "tax": ""}
        }));
        assert_eq!(report.validation_result, Verdict::Fail);
        assert_eq!(report.errors.get("total"), Some("12"));
        assert!(!report.errors.contains("tax"));
    }

    #[test]
    fn model_reply_bare_fail_gets_summary_error() {
        let report = report_from_model_reply(json!({"validationResult": "fail"}));
        assert_eq!(report.validation_result, Verdict::Fail);
        assert!(report.errors.contains("invoice"));
    }

    #[test]
    fn validation_prompt_follows_policy() {
        let form = InvoiceRecord::default();
        let strict = validation_prompt(&form, MissingFieldPolicy::Strict).unwrap();
        let lenient = validation_prompt(&form, MissingFieldPolicy::Lenient).unwrap();
        assert!(strict.contains("MUST report an error"));
        assert!(lenient.contains("do NOT report an error, even when"));
        assert!(strict.contains("\"vendorName\": \"\""));
    }
}
