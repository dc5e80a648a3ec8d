use crate::models::{
    InvoiceRecord, LineItem, MissingFieldPolicy, ValidationErrorSet, ValidationReport,
};
use crate::service::dates::normalize_date;

/// 单个字段的比较值
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(String),
    Number(f64),
}

impl FieldValue {
    /// 空串 / 0 视为缺失
    fn is_present(&self) -> bool {
        match self {
            FieldValue::Text(s) => !s.is_empty(),
            FieldValue::Number(n) => *n != 0.0,
        }
    }

    fn display(&self) -> String {
        match self {
            FieldValue::Text(s) => format!("\"{}\"", s),
            FieldValue::Number(n) => n.to_string(),
        }
    }
}

fn text(value: &str) -> FieldValue {
    FieldValue::Text(value.trim().to_string())
}

/// 日期比较前统一为 `YYYY-MM-DD`
///
/// 发票侧无法解析时视为缺失 (Case C)；表单侧无法解析时保留原文，必然与发票值不等。
fn extracted_date(value: &str) -> FieldValue {
    FieldValue::Text(normalize_date(value).unwrap_or_default())
}

fn user_date(value: &str) -> FieldValue {
    FieldValue::Text(normalize_date(value).unwrap_or_else(|| value.trim().to_string()))
}

/// 字段校验器: 表单值 vs 发票提取值
///
/// 对每个标量字段按三种情况处理:
/// - Case A: 双方都有值且不相等 -> 报错
/// - Case B: 表单为空而发票有值 -> 由 [`MissingFieldPolicy`] 决定
/// - Case C: 发票上没有该字段 -> 永不报错
pub struct Reconciler {
    policy: MissingFieldPolicy,
}

impl Reconciler {
    pub fn new(policy: MissingFieldPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MissingFieldPolicy {
        self.policy
    }

    /// 比较表单与提取结果，生成校验报告
    pub fn reconcile(&self, user: &InvoiceRecord, extracted: &InvoiceRecord) -> ValidationReport {
        let mut errors = ValidationErrorSet::new();

        let scalar_fields = [
            ("invoiceNumber", "Invoice Number", text(&user.invoice_number), text(&extracted.invoice_number)),
            ("invoiceDate", "Invoice Date", user_date(&user.invoice_date), extracted_date(&extracted.invoice_date)),
            ("dueDate", "Due Date", user_date(&user.due_date), extracted_date(&extracted.due_date)),
            ("vendorName", "Vendor Name", text(&user.vendor_name), text(&extracted.vendor_name)),
            ("vendorEmail", "Vendor Email", text(&user.vendor_email), text(&extracted.vendor_email)),
            ("vendorAddress", "Vendor Address", text(&user.vendor_address), text(&extracted.vendor_address)),
            ("billToName", "Bill To Name", text(&user.bill_to_name), text(&extracted.bill_to_name)),
            ("billToAddress", "Bill To Address", text(&user.bill_to_address), text(&extracted.bill_to_address)),
            ("subtotal", "Subtotal", FieldValue::Number(user.subtotal), FieldValue::Number(extracted.subtotal)),
            ("tax", "Tax", FieldValue::Number(user.tax), FieldValue::Number(extracted.tax)),
            ("total", "Total", FieldValue::Number(user.total), FieldValue::Number(extracted.total)),
        ];

        for (path, label, user_value, extracted_value) in scalar_fields {
            self.compare(&mut errors, path, label, &user_value, &extracted_value);
        }

        self.compare_items(&mut errors, &user.items, &extracted.items);

        let report = ValidationReport::from_errors(errors);
        tracing::debug!(
            verdict = ?report.validation_result,
            errors = report.errors.len(),
            policy = ?self.policy,
            "reconciled invoice"
        );
        report
    }

    /// 按位置比较明细；多出的发票明细按 Case B 处理，多出的表单明细按 Case C 处理
    fn compare_items(&self, errors: &mut ValidationErrorSet, user: &[LineItem], extracted: &[LineItem]) {
        for (idx, (u, e)) in user.iter().zip(extracted.iter()).enumerate() {
            let item_fields = [
                ("description", "Description", text(&u.description), text(&e.description)),
                ("quantity", "Quantity", FieldValue::Number(u.quantity), FieldValue::Number(e.quantity)),
                ("unitPrice", "Unit Price", FieldValue::Number(u.unit_price), FieldValue::Number(e.unit_price)),
            ];
            for (field, label, user_value, extracted_value) in item_fields {
                let path = format!("items[{}].{}", idx, field);
                let label = format!("Item {} {}", idx + 1, label);
                self.compare(errors, &path, &label, &user_value, &extracted_value);
            }
        }

        if self.policy == MissingFieldPolicy::Strict {
            for (idx, e) in extracted.iter().enumerate().skip(user.len()) {
                errors.insert(
                    format!("items[{}]", idx),
                    format!(
                        "Item {} is missing from the form. The invoice lists \"{}\" (quantity {}, unit price {}).",
                        idx + 1,
                        e.description.trim(),
                        e.quantity,
                        e.unit_price
                    ),
                );
            }
        }
    }

    fn compare(
        &self,
        errors: &mut ValidationErrorSet,
        path: &str,
        label: &str,
        user: &FieldValue,
        extracted: &FieldValue,
    ) {
        // Case C
        if !extracted.is_present() {
            return;
        }

        if user.is_present() {
            // Case A
            if user != extracted {
                errors.insert(
                    path,
                    format!(
                        "{} does not match the invoice. Expected {}, found {}.",
                        label,
                        extracted.display(),
                        user.display()
                    ),
                );
            }
        } else if self.policy == MissingFieldPolicy::Strict {
            // Case B
            errors.insert(
                path,
                format!("{} is missing. The invoice shows {}.", label, extracted.display()),
            );
        }
    }
}
