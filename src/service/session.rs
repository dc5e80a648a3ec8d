use crate::error::SessionError;
use crate::models::{InvoiceRecord, LineItemField, SessionState, UploadInfo, ValidationReport};
use chrono::{Duration, Utc};
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// 会话中正在进行的请求凭据
///
/// 完成时凭 `generation` 判断会话是否已被重置，重置后的结果直接丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub session_id: Uuid,
    generation: u64,
}

/// 持有凭据的请求守卫
///
/// 未调用 `complete_*` 就被丢弃时 (请求出错、客户端断开导致 handler 被取消) 自动释放占用。
pub struct RequestGuard {
    store: Arc<SessionStore>,
    ticket: Option<RequestTicket>,
}

impl RequestGuard {
    pub fn new(store: Arc<SessionStore>, ticket: RequestTicket) -> Self {
        Self { store, ticket: Some(ticket) }
    }

    pub fn complete_extraction(mut self, invoice: InvoiceRecord) -> bool {
        match self.ticket.take() {
            Some(ticket) => self.store.complete_extraction(ticket, invoice),
            None => false,
        }
    }

    pub fn complete_validation(mut self, form: InvoiceRecord, report: ValidationReport) -> bool {
        match self.ticket.take() {
            Some(ticket) => self.store.complete_validation(ticket, form, report),
            None => false,
        }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            tracing::info!(session = %ticket.session_id, "Request ended without result, releasing session");
            self.store.abort(ticket);
        }
    }
}

/// 会话表: 每个用户一份界面状态，互不共享
pub struct SessionStore {
    sessions: DashMap<Uuid, SessionState>,
    tax_rate: f64,
}

impl SessionStore {
    pub fn new(tax_rate: f64) -> Self {
        Self {
            sessions: DashMap::new(),
            tax_rate,
        }
    }

    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, SessionState::new());
        tracing::info!(session = %id, "Session created");
        id
    }

    /// 取会话并刷新活跃时间
    fn session_mut(&self, id: Uuid) -> Result<RefMut<'_, Uuid, SessionState>, SessionError> {
        let mut session = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        session.last_active = Utc::now();
        Ok(session)
    }

    pub fn get(&self, id: Uuid) -> Result<SessionState, SessionError> {
        self.session_mut(id).map(|s| s.value().clone())
    }

    pub fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        self.sessions.remove(&id).map(|_| ()).ok_or(SessionError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 删除闲置超过 `max_idle` 的会话 (有请求进行中的除外)，返回删除数量
    pub fn purge_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.in_flight || s.last_active >= cutoff);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            tracing::info!(purged, remaining = self.sessions.len(), "Purged idle sessions");
        }
        purged
    }

    /// 清空表单、上传与校验结果；进行中的请求结果将被丢弃
    pub fn reset(&self, id: Uuid) -> Result<(), SessionError> {
        let mut session = self.session_mut(id)?;
        let generation = session.generation + 1;
        *session = SessionState { generation, ..SessionState::new() };
        tracing::info!(session = %id, generation, "Session reset");
        Ok(())
    }

    /// 开始一次提取: 清空旧数据并记录上传信息
    pub fn begin_upload(&self, id: Uuid, upload: UploadInfo) -> Result<RequestTicket, SessionError> {
        let mut session = self.session_mut(id)?;
        if session.in_flight {
            return Err(SessionError::Busy(id));
        }
        session.invoice = None;
        session.last_validation = None;
        session.upload = Some(upload);
        session.in_flight = true;
        Ok(RequestTicket { session_id: id, generation: session.generation })
    }

    /// 开始一次校验
    pub fn begin_validation(&self, id: Uuid) -> Result<RequestTicket, SessionError> {
        let mut session = self.session_mut(id)?;
        if session.in_flight {
            return Err(SessionError::Busy(id));
        }
        session.in_flight = true;
        Ok(RequestTicket { session_id: id, generation: session.generation })
    }

    /// 结束请求；会话已重置或已删除时返回 false，结果不写入
    pub fn finish(&self, ticket: RequestTicket, apply: impl FnOnce(&mut SessionState)) -> bool {
        let Ok(mut session) = self.session_mut(ticket.session_id) else {
            return false;
        };
        if session.generation != ticket.generation {
            tracing::info!(session = %ticket.session_id, "Discarding result after reset");
            return false;
        }
        session.in_flight = false;
        apply(session.value_mut());
        true
    }

    pub fn complete_extraction(&self, ticket: RequestTicket, invoice: InvoiceRecord) -> bool {
        self.finish(ticket, |s| s.invoice = Some(invoice))
    }

    /// 新的校验结果整体替换旧结果，表单同步为提交的版本
    pub fn complete_validation(
        &self,
        ticket: RequestTicket,
        form: InvoiceRecord,
        report: ValidationReport,
    ) -> bool {
        self.finish(ticket, |s| {
            s.invoice = Some(form);
            s.last_validation = Some(report);
        })
    }

    /// 请求失败时释放占用
    pub fn abort(&self, ticket: RequestTicket) {
        self.finish(ticket, |_| {});
    }

    /// 用户整体修改表单
    pub fn replace_invoice(&self, id: Uuid, invoice: InvoiceRecord) -> Result<InvoiceRecord, SessionError> {
        let mut session = self.session_mut(id)?;
        session.invoice = Some(invoice.clone());
        Ok(invoice)
    }

    /// 修改单个明细字段
    ///
    /// 修改数量或单价时重算该行金额；任何明细修改后重算 小计、税额、合计。
    pub fn edit_item(
        &self,
        id: Uuid,
        index: usize,
        field: LineItemField,
        value: &Value,
    ) -> Result<InvoiceRecord, SessionError> {
        let mut session = self.session_mut(id)?;
        let invoice = session.invoice.as_mut().ok_or(SessionError::NoInvoice(id))?;
        let len = invoice.items.len();
        let item = invoice
            .items
            .get_mut(index)
            .ok_or(SessionError::ItemOutOfRange { index, len })?;

        match field {
            LineItemField::Description => {
                item.description = value
                    .as_str()
                    .ok_or_else(|| invalid(field, "expected a string"))?
                    .to_string();
            }
            LineItemField::Quantity | LineItemField::UnitPrice => {
                let number = parse_non_negative(field, value)?;
                if field == LineItemField::Quantity {
                    item.quantity = number;
                } else {
                    item.unit_price = number;
                }
                item.recompute_amount();
            }
        }

        invoice.recompute_totals(self.tax_rate);
        Ok(invoice.clone())
    }
}

fn invalid(field: LineItemField, reason: &str) -> SessionError {
    SessionError::InvalidValue { field: field.as_str(), reason: reason.to_string() }
}

fn parse_non_negative(field: LineItemField, value: &Value) -> Result<f64, SessionError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
    .ok_or_else(|| invalid(field, "expected a number"))?;

    if number < 0.0 {
        return Err(invalid(field, "must not be negative"));
    }
    Ok(number)
}
