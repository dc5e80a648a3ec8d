use crate::models::{InvoiceRecord, LineItem};
use crate::service::dates::normalize_date;
use serde_json::Value;

/// 将模型返回的任意 JSON 归一化为完整的 InvoiceRecord
///
/// 纯函数，对任何输入都不会失败:
/// - 字段优先取嵌套写法 (`vendor.name`)，其次扁平写法 (`vendorName`)，最后默认值
/// - `items` 不是数组时输出空列表；明细数值无法转换时取 0
/// - 小计为 0 或缺失时按明细金额求和。注意: 显式的 `subtotal: 0` 与缺失等价，同样会被重算
/// - 税额、合计只做数值转换，不做推导
/// - 日期规范为 `YYYY-MM-DD`，无法解析时为空串
pub fn normalize(raw: &Value) -> InvoiceRecord {
    let items: Vec<LineItem> = match raw.get("items") {
        Some(Value::Array(items)) => items.iter().map(normalize_item).collect(),
        _ => Vec::new(),
    };

    let subtotal = match coerce_number(raw.get("subtotal")) {
        provided if provided != 0.0 => provided,
        _ => items.iter().map(|item| item.amount).sum(),
    };

    InvoiceRecord {
        invoice_number: resolve_text(raw, None, "invoiceNumber"),
        invoice_date: normalize_date_field(raw, "invoiceDate"),
        due_date: normalize_date_field(raw, "dueDate"),
        vendor_name: resolve_text(raw, Some(("vendor", "name")), "vendorName"),
        vendor_email: resolve_text(raw, Some(("vendor", "email")), "vendorEmail"),
        vendor_address: resolve_text(raw, Some(("vendor", "address")), "vendorAddress"),
        bill_to_name: resolve_text(raw, Some(("customer", "name")), "billToName"),
        bill_to_address: resolve_text(raw, Some(("customer", "address")), "billToAddress"),
        items,
        subtotal,
        tax: coerce_number(raw.get("tax")),
        total: coerce_number(raw.get("total")),
    }
}

fn normalize_item(raw: &Value) -> LineItem {
    LineItem {
        description: coerce_text(raw.get("description")).unwrap_or_default(),
        quantity: coerce_number(raw.get("quantity")),
        unit_price: coerce_number(raw.get("unitPrice")),
        amount: coerce_number(raw.get("amount")),
    }
}

fn normalize_date_field(raw: &Value, key: &str) -> String {
    let text = resolve_text(raw, None, key);
    normalize_date(&text).unwrap_or_default()
}

/// 嵌套 -> 扁平 -> 空串
fn resolve_text(raw: &Value, nested: Option<(&str, &str)>, flat: &str) -> String {
    nested
        .and_then(|(parent, child)| coerce_text(raw.get(parent).and_then(|p| p.get(child))))
        .or_else(|| coerce_text(raw.get(flat)))
        .unwrap_or_default()
}

/// 字符串原样返回，数字/布尔转为文本，其余视为缺失
fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 数值转换，失败取 0
///
/// 接受 JSON 数字、纯数字字符串 (两侧可有空白) 和布尔值。
pub fn coerce_number(value: Option<&Value>) -> f64 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    number.filter(|n| n.is_finite()).unwrap_or(0.0)
}
