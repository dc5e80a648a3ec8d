use chrono::{Datelike, NaiveDate};

/// 按顺序尝试的日期格式 (美式 月/日 优先于 日/月)
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
    "%d %b %Y",
    "%d-%b-%Y",
    "%b-%d-%Y",
    "%m/%d/%y",
    "%d/%m/%y",
];

/// 将常见日期写法规范为 `YYYY-MM-DD`
///
/// 支持 ISO 日期与日期时间、斜杠/点号分隔、英文月份名 (`January 15, 2022`、
/// `15th Jan 2022`)。无法解析时返回 `None`，不会 panic。
pub fn normalize_date(input: &str) -> Option<String> {
    parse_date(input).map(|date| date.format("%Y-%m-%d").to_string())
}

/// 解析日期，失败返回 `None`
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let cleaned = clean(input);
    if cleaned.is_empty() {
        return None;
    }

    if let Some(date) = parse_iso_datetime_prefix(&cleaned) {
        return Some(date);
    }

    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .find(|date| (1900..=2199).contains(&date.year()))
}

/// `2022-01-15T10:00:00Z` / `2022-01-15 10:00` 只取日期部分
fn parse_iso_datetime_prefix(value: &str) -> Option<NaiveDate> {
    let (head, rest) = (value.get(..10)?, value.get(10..)?);
    if !(rest.starts_with('T') || rest.starts_with(' ')) {
        return None;
    }
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// 合并空白，去掉序数后缀 (1st / 2nd / 3rd / 15th)
fn clean(input: &str) -> String {
    input
        .split_whitespace()
        .map(strip_ordinal)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_ordinal(token: &str) -> String {
    let (body, trailing) = match token.strip_suffix(',') {
        Some(body) => (body, ","),
        None => (token, ""),
    };

    let lower = body.to_ascii_lowercase();
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(digits) = lower.strip_suffix(suffix) {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return format!("{}{}", digits, trailing);
            }
        }
    }
    token.to_string()
}
