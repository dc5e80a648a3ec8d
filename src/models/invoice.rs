use serde::{Deserialize, Serialize};

/// 发票记录 (归一化后的完整结构)
///
/// 所有字段都有默认值: 字符串为 `""`，数值为 `0`。日期字段为 `YYYY-MM-DD` 或空串。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceRecord {
    pub invoice_number: String,
    pub invoice_date: String,
    pub due_date: String,
    pub vendor_name: String,
    pub vendor_email: String,
    pub vendor_address: String,
    pub bill_to_name: String,
    pub bill_to_address: String,
    pub items: Vec<LineItem>,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
}

/// 发票明细行
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub amount: f64,
}

impl LineItem {
    /// 按 数量 × 单价 重算金额
    pub fn recompute_amount(&mut self) {
        self.amount = self.quantity * self.unit_price;
    }
}

impl InvoiceRecord {
    /// 明细金额合计
    pub fn items_amount_sum(&self) -> f64 {
        self.items.iter().map(|item| item.amount).sum()
    }

    /// 明细变更后重算 小计 / 税额 / 合计
    pub fn recompute_totals(&mut self, tax_rate: f64) {
        self.subtotal = self.items_amount_sum();
        self.tax = self.subtotal * tax_rate;
        self.total = self.subtotal + self.tax;
    }
}

/// 明细行可编辑字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineItemField {
    Description,
    Quantity,
    UnitPrice,
}

impl LineItemField {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemField::Description => "description",
            LineItemField::Quantity => "quantity",
            LineItemField::UnitPrice => "unitPrice",
        }
    }
}
