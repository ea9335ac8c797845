//! In-process emulated fiscal register.
//!
//! Keeps real session and document state so the full receipt flow can be
//! exercised without hardware: session expiry, tax-code validation, payment
//! coverage on close, a journal of closed documents and an unsent counter.

use crate::fiscal::config::{parse_config, ConfigError};
use crate::fiscal::driver::{DriverError, DriverResult, FiscalDriver};
use crate::fiscal::receipt::{
    FiscalFormat, PaymentType, Position, Receipt, SessionStatus, PAYMENT_SLOTS,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const DEFAULT_SESSION_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings accepted by [`VirtualDevice::configure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualConfig {
    pub doc_format: FiscalFormat,
    /// Tax codes the device accepts on positions.
    pub tax_codes: Vec<String>,
    /// Session length before it reports `Expired`.
    pub session_hours: i64,
    /// Refuse new documents once this many are unsent. 0 = unlimited.
    pub max_unsent: u32,
    /// Session state found on connect (`closed`, `opened` or `expired`).
    pub initial_session: SessionStatus,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            doc_format: FiscalFormat::Ffd120,
            tax_codes: ["A", "B", "C", "D", "E", "F"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            session_hours: DEFAULT_SESSION_HOURS,
            max_unsent: 0,
            initial_session: SessionStatus::Closed,
        }
    }
}

impl VirtualConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "sessionHours",
                reason: format!("must be positive, got {}", self.session_hours),
            });
        }
        if self.tax_codes.is_empty() {
            return Err(ConfigError::Invalid {
                key: "taxCodes",
                reason: "at least one tax code is required".into(),
            });
        }
        if self.initial_session == SessionStatus::Unknown {
            return Err(ConfigError::Invalid {
                key: "initialSession",
                reason: "must be closed, opened or expired".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A registered line with its computed sum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLine {
    pub name: String,
    pub quantity: f64,
    pub price: u32,
    pub tax_code: String,
    pub sum: u64,
}

#[derive(Debug, Clone, Default)]
struct OpenDocument {
    operator: Option<String>,
    lines: Vec<DocumentLine>,
    /// Running sum of `lines`, kept overflow-checked as lines are added.
    lines_total: u64,
    paid: [u64; PAYMENT_SLOTS],
}

/// A fiscalized document kept in the device journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedDocument {
    pub number: u64,
    pub session: u32,
    pub operator: Option<String>,
    pub lines: Vec<DocumentLine>,
    pub paid: [u64; PAYMENT_SLOTS],
    pub total: u64,
    pub closed_at: DateTime<Utc>,
    pub sent: bool,
}

/// End-of-session summary produced by `close_session`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZReport {
    pub session: u32,
    pub documents: u32,
    pub total: u64,
    pub closed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct VirtualDevice {
    config: VirtualConfig,
    connected: bool,
    session: SessionStatus,
    session_number: u32,
    session_opened_at: Option<DateTime<Utc>>,
    session_documents: u32,
    session_total: u64,
    next_document: u64,
    document: Option<OpenDocument>,
    journal: Vec<ClosedDocument>,
    z_reports: Vec<ZReport>,
    last_error: String,
}

impl VirtualDevice {
    pub fn new() -> Self {
        Self::with_config(VirtualConfig::default())
    }

    pub fn with_config(config: VirtualConfig) -> Self {
        Self {
            session: config.initial_session,
            config,
            connected: false,
            session_number: 0,
            session_opened_at: None,
            session_documents: 0,
            session_total: 0,
            next_document: 1,
            document: None,
            journal: Vec::new(),
            z_reports: Vec::new(),
            last_error: String::new(),
        }
    }

    pub fn config(&self) -> &VirtualConfig {
        &self.config
    }

    pub fn journal(&self) -> &[ClosedDocument] {
        &self.journal
    }

    pub fn z_reports(&self) -> &[ZReport] {
        &self.z_reports
    }

    /// Whether a fiscal document is currently open.
    pub fn has_open_document(&self) -> bool {
        self.document.is_some()
    }

    /// Mark every journaled document as transmitted. Returns how many were sent.
    pub fn flush_unsent(&mut self) -> u32 {
        let mut sent = 0;
        for doc in self.journal.iter_mut().filter(|d| !d.sent) {
            doc.sent = true;
            sent += 1;
        }
        if sent > 0 {
            info!("Transmitted {sent} fiscal documents");
        }
        sent
    }

    /// Move the session start back in time (for expiry handling and tests).
    pub fn backdate_session(&mut self, by: Duration) {
        if let Some(at) = self.session_opened_at.as_mut() {
            *at -= by;
        }
    }

    /// Record the error text and hand the error back.
    fn fail(&mut self, err: DriverError) -> DriverError {
        warn!("Virtual fiscal device: {err}");
        self.last_error = err.to_string();
        err
    }

    fn require_connected(&mut self) -> DriverResult {
        if self.connected {
            Ok(())
        } else {
            Err(self.fail(DriverError::NotConnected))
        }
    }

    fn require_document(&mut self) -> DriverResult<&mut OpenDocument> {
        self.require_connected()?;
        if self.document.is_none() {
            return Err(self.fail(DriverError::InvalidState("no open document".into())));
        }
        self.document
            .as_mut()
            .ok_or_else(|| DriverError::InvalidState("no open document".into()))
    }

    fn unsent(&self) -> u32 {
        self.journal.iter().filter(|d| !d.sent).count() as u32
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FiscalDriver for VirtualDevice {
    fn session_status(&self) -> SessionStatus {
        if !self.connected {
            return SessionStatus::Unknown;
        }
        match (self.session, self.session_opened_at) {
            (SessionStatus::Opened, Some(at))
                if Utc::now() - at > Duration::hours(self.config.session_hours) =>
            {
                SessionStatus::Expired
            }
            (status, _) => status,
        }
    }

    fn open_session(&mut self) -> DriverResult {
        self.require_connected()?;
        let status = self.session_status();
        if status != SessionStatus::Closed {
            return Err(self.fail(DriverError::InvalidSession(status)));
        }
        self.session = SessionStatus::Opened;
        self.session_number += 1;
        self.session_opened_at = Some(Utc::now());
        self.session_documents = 0;
        self.session_total = 0;
        info!("Fiscal session {} opened", self.session_number);
        Ok(())
    }

    fn close_session(&mut self) -> DriverResult {
        self.require_connected()?;
        let status = self.session_status();
        if !matches!(status, SessionStatus::Opened | SessionStatus::Expired) {
            return Err(self.fail(DriverError::InvalidSession(status)));
        }
        if self.document.is_some() {
            return Err(self.fail(DriverError::InvalidState(
                "cannot close session with an open document".into(),
            )));
        }
        let report = ZReport {
            session: self.session_number,
            documents: self.session_documents,
            total: self.session_total,
            closed_at: Utc::now(),
        };
        info!(
            "Fiscal session {} closed: {} documents, total {}",
            report.session, report.documents, report.total
        );
        self.z_reports.push(report);
        self.session = SessionStatus::Closed;
        self.session_opened_at = None;
        Ok(())
    }

    fn open_receipt(&mut self, receipt: &Receipt) -> DriverResult {
        self.require_connected()?;
        let status = self.session_status();
        if status != SessionStatus::Opened {
            return Err(self.fail(DriverError::InvalidSession(status)));
        }
        if self.document.is_some() {
            return Err(self.fail(DriverError::InvalidState("a document is already open".into())));
        }
        if self.config.max_unsent > 0 && self.unsent() >= self.config.max_unsent {
            return Err(self.fail(DriverError::Rejected(format!(
                "unsent document limit of {} reached",
                self.config.max_unsent
            ))));
        }
        self.document = Some(OpenDocument {
            operator: receipt.operator.clone(),
            ..Default::default()
        });
        debug!("Document {} opened", self.next_document);
        Ok(())
    }

    fn register_position(&mut self, position: &Position) -> DriverResult {
        self.require_document()?;
        if !(position.quantity.is_finite() && position.quantity > 0.0) {
            let err = DriverError::Rejected(format!(
                "invalid quantity {} for '{}'",
                position.quantity, position.name
            ));
            return Err(self.fail(err));
        }
        if !self.config.tax_codes.iter().any(|c| c == &position.tax_code) {
            let err = DriverError::Rejected(format!(
                "unknown tax code '{}' for '{}'",
                position.tax_code, position.name
            ));
            return Err(self.fail(err));
        }
        let name = &position.name;
        let product = (f64::from(position.price) * position.quantity).round();
        if product >= u64::MAX as f64 {
            let err = DriverError::Rejected(format!("line sum out of range for '{name}'"));
            return Err(self.fail(err));
        }
        let sum = product as u64;
        let running = self.document.as_ref().map_or(0, |d| d.lines_total);
        let Some(lines_total) = running.checked_add(sum) else {
            let err = DriverError::Rejected(format!("positions sum overflows at '{name}'"));
            return Err(self.fail(err));
        };
        if let Some(doc) = self.document.as_mut() {
            doc.lines_total = lines_total;
            doc.lines.push(DocumentLine {
                name: position.name.clone(),
                quantity: position.quantity,
                price: position.price,
                tax_code: position.tax_code.clone(),
                sum,
            });
        }
        Ok(())
    }

    fn single_payment(&mut self, kind: PaymentType, amount: u32) -> DriverResult {
        let doc = self.require_document()?;
        let slot = &mut doc.paid[kind as usize];
        match slot.checked_add(u64::from(amount)) {
            Some(v) => {
                *slot = v;
                Ok(())
            }
            None => {
                let err = DriverError::Rejected(format!("{kind:?} payment sum overflows"));
                Err(self.fail(err))
            }
        }
    }

    fn close_receipt(&mut self, total: Option<u32>) -> DriverResult {
        let doc = self.require_document()?;
        let lines_total = doc.lines_total;
        let cash = doc.paid[PaymentType::Cash as usize];
        let paid = doc.paid.iter().try_fold(0u64, |acc, &p| acc.checked_add(p));
        let Some(paid) = paid else {
            return Err(self.fail(DriverError::Rejected("payments sum overflows".into())));
        };
        let non_cash = paid - cash;
        let total = match total {
            Some(t) if u64::from(t) > lines_total => {
                let err = DriverError::Rejected(format!(
                    "asserted total {t} exceeds positions sum {lines_total}"
                ));
                return Err(self.fail(err));
            }
            Some(t) => u64::from(t),
            None => lines_total,
        };

        if paid < total {
            let err = DriverError::Rejected(format!("paid {paid} does not cover total {total}"));
            return Err(self.fail(err));
        }
        if non_cash > total {
            let err =
                DriverError::Rejected(format!("non-cash payments {non_cash} exceed total {total}"));
            return Err(self.fail(err));
        }

        let Some(session_total) = self.session_total.checked_add(total) else {
            let err = DriverError::Rejected("session total overflows".into());
            return Err(self.fail(err));
        };
        let Some(doc) = self.document.take() else {
            return Err(self.fail(DriverError::InvalidState("no open document".into())));
        };
        let number = self.next_document;
        self.next_document += 1;
        self.session_documents += 1;
        self.session_total = session_total;
        self.journal.push(ClosedDocument {
            number,
            session: self.session_number,
            operator: doc.operator,
            lines: doc.lines,
            paid: doc.paid,
            total,
            closed_at: Utc::now(),
            sent: false,
        });
        info!("Fiscal document {number} closed, total {total}");
        Ok(())
    }

    fn cancel_document(&mut self) -> bool {
        match self.document.take() {
            Some(doc) => {
                info!("Open document voided ({} lines)", doc.lines.len());
                true
            }
            None => false,
        }
    }

    fn configure(&mut self, args: &str) -> DriverResult {
        if self.connected {
            return Err(self.fail(DriverError::InvalidState(
                "configure must be called before connect".into(),
            )));
        }
        let config: VirtualConfig = parse_config(args).map_err(|e| self.fail(e.into()))?;
        config.validate().map_err(|e| self.fail(e.into()))?;
        self.session = config.initial_session;
        self.config = config;
        debug!("Virtual fiscal device configured: {:?}", self.config);
        Ok(())
    }

    fn connect(&mut self) -> DriverResult {
        if !self.connected {
            self.connected = true;
            if self.session != SessionStatus::Closed && self.session_opened_at.is_none() {
                self.session_number += 1;
                self.session_opened_at = Some(Utc::now());
                if self.session == SessionStatus::Expired {
                    // Present as an opened session past its length.
                    self.session = SessionStatus::Opened;
                    self.backdate_session(Duration::hours(self.config.session_hours + 1));
                }
            }
            info!("Virtual fiscal device connected");
        }
        Ok(())
    }

    fn disconnect(&mut self) -> DriverResult {
        if self.connected {
            self.cancel_document();
            self.connected = false;
            info!("Virtual fiscal device disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn last_error_message(&self) -> String {
        self.last_error.clone()
    }

    fn unsend_counter(&self) -> u32 {
        self.unsent()
    }

    fn name(&self) -> &str {
        "Virtual fiscal device"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn doc_format(&self) -> FiscalFormat {
        self.config.doc_format
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiscal::orchestrator::Orchestrator;
    use crate::fiscal::receipt::Payment;
    use crate::logging::Logger;

    fn connected() -> VirtualDevice {
        let mut dev = VirtualDevice::new();
        dev.connect().unwrap();
        dev
    }

    fn coffee_receipt() -> Receipt {
        Receipt::new(
            vec![
                Position::new("Coffee", 2.0, 350, "A"),
                Position::new("Croissant", 1.0, 200, "B"),
            ],
            Payment::cash(1000).with(PaymentType::Card, 0),
        )
        .with_operator("Anna")
    }

    #[test]
    fn test_disconnected_status_is_unknown() {
        let dev = VirtualDevice::new();
        assert_eq!(dev.session_status(), SessionStatus::Unknown);
        assert!(!dev.is_connected());
    }

    #[test]
    fn test_full_receipt_via_orchestrator() {
        let mut dev = connected();
        let orch = Orchestrator::new(Logger::noop());
        assert!(orch.create_receipt(&mut dev, &coffee_receipt()));

        assert_eq!(dev.session_status(), SessionStatus::Opened);
        assert_eq!(dev.journal().len(), 1);
        let doc = &dev.journal()[0];
        assert_eq!(doc.number, 1);
        assert_eq!(doc.total, 900);
        assert_eq!(doc.paid[0], 1000);
        assert_eq!(doc.operator.as_deref(), Some("Anna"));
        assert_eq!(dev.unsend_counter(), 1);
        assert!(!dev.has_open_document());
    }

    #[test]
    fn test_rejected_tax_code_voids_document() {
        let mut dev = connected();
        let orch = Orchestrator::new(Logger::noop());
        let receipt = Receipt::new(vec![Position::new("Tea", 1.0, 100, "Z")], Payment::cash(100));
        assert!(!orch.create_receipt(&mut dev, &receipt));
        assert!(!dev.has_open_document());
        assert!(dev.journal().is_empty());
        assert!(dev.last_error_message().contains("unknown tax code 'Z'"));
    }

    #[test]
    fn test_underpayment_is_rejected_on_close() {
        let mut dev = connected();
        let orch = Orchestrator::new(Logger::noop());
        let receipt = Receipt::new(vec![Position::new("Tea", 1.0, 500, "A")], Payment::cash(100));
        assert!(!orch.create_receipt(&mut dev, &receipt));
        assert!(dev.last_error_message().contains("does not cover"));
        assert_eq!(dev.unsend_counter(), 0);
    }

    #[test]
    fn test_card_overpayment_is_rejected() {
        let mut dev = connected();
        let orch = Orchestrator::new(Logger::noop());
        let receipt = Receipt::new(
            vec![Position::new("Tea", 1.0, 500, "A")],
            Payment::default().with(PaymentType::Card, 600),
        );
        assert!(!orch.create_receipt(&mut dev, &receipt));
        assert!(dev.last_error_message().contains("non-cash"));
    }

    #[test]
    fn test_rounded_sum_lowers_total() {
        let mut dev = connected();
        let orch = Orchestrator::new(Logger::noop());
        let receipt = Receipt::new(
            vec![Position::new("Bread", 1.0, 4999, "A")],
            Payment::cash(4900),
        )
        .with_rounded_sum(4900);
        assert!(orch.create_receipt(&mut dev, &receipt));
        assert_eq!(dev.journal()[0].total, 4900);
    }

    #[test]
    fn test_huge_line_is_rejected() {
        let mut dev = connected();
        let orch = Orchestrator::new(Logger::noop());
        let receipt = Receipt::new(
            vec![
                Position::new("Bulk", 1e20, u32::MAX, "A"),
                Position::new("Bulk", 1e20, u32::MAX, "A"),
            ],
            Payment::cash(u32::MAX),
        );
        assert!(!orch.create_receipt(&mut dev, &receipt));
        assert!(dev.last_error_message().contains("line sum out of range for 'Bulk'"));
        assert!(!dev.has_open_document());
        assert!(dev.journal().is_empty());
    }

    #[test]
    fn test_positions_sum_overflow_is_rejected() {
        let mut dev = connected();
        let orch = Orchestrator::new(Logger::noop());
        // Each line fits in u64 on its own; together they do not.
        let receipt = Receipt::new(
            vec![
                Position::new("Pallet", 3e9, u32::MAX, "A"),
                Position::new("Pallet", 3e9, u32::MAX, "A"),
            ],
            Payment::cash(u32::MAX),
        );
        assert!(!orch.create_receipt(&mut dev, &receipt));
        assert!(dev.last_error_message().contains("positions sum overflows at 'Pallet'"));
        assert!(!dev.has_open_document());
    }

    #[test]
    fn test_rounded_sum_above_positions_is_rejected() {
        let mut dev = connected();
        dev.open_session().unwrap();
        dev.open_receipt(&Receipt::default()).unwrap();
        dev.register_position(&Position::new("Bread", 1.0, 100, "A")).unwrap();
        dev.single_payment(PaymentType::Cash, 200).unwrap();
        assert!(dev.close_receipt(Some(150)).is_err());
        assert!(dev.has_open_document());
        assert!(dev.cancel_document());
        assert!(!dev.cancel_document());
    }

    #[test]
    fn test_session_expires_and_is_rolled_over() {
        let mut dev = connected();
        dev.open_session().unwrap();
        dev.backdate_session(Duration::hours(25));
        assert_eq!(dev.session_status(), SessionStatus::Expired);

        let orch = Orchestrator::new(Logger::noop());
        assert!(orch.create_receipt(&mut dev, &coffee_receipt()));
        assert_eq!(dev.z_reports().len(), 1);
        assert_eq!(dev.z_reports()[0].session, 1);
        assert_eq!(dev.journal()[0].session, 2);
    }

    #[test]
    fn test_close_session_with_open_document_fails() {
        let mut dev = connected();
        dev.open_session().unwrap();
        dev.open_receipt(&Receipt::default()).unwrap();
        assert!(dev.close_session().is_err());
        assert!(dev.last_error_message().contains("open document"));
    }

    #[test]
    fn test_open_session_twice_fails() {
        let mut dev = connected();
        dev.open_session().unwrap();
        let err = dev.open_session().unwrap_err();
        assert!(matches!(err, DriverError::InvalidSession(SessionStatus::Opened)));
    }

    #[test]
    fn test_configure_parses_json() {
        let mut dev = VirtualDevice::new();
        dev.configure(r#"{"docFormat":"ffd_1_05","taxCodes":["V1","V2"],"maxUnsent":2}"#)
            .unwrap();
        assert_eq!(dev.doc_format(), FiscalFormat::Ffd105);
        assert_eq!(dev.config().tax_codes, vec!["V1", "V2"]);
        assert_eq!(dev.config().session_hours, DEFAULT_SESSION_HOURS);
    }

    #[test]
    fn test_configure_rejects_bad_values() {
        let mut dev = VirtualDevice::new();
        assert!(dev.configure(r#"{"sessionHours":0}"#).is_err());
        assert!(dev.last_error_message().contains("sessionHours"));
        assert!(dev.configure("not json").is_err());
        assert!(dev.last_error_message().starts_with("malformed configuration"));
    }

    #[test]
    fn test_configure_after_connect_fails() {
        let mut dev = connected();
        assert!(dev.configure("").is_err());
    }

    #[test]
    fn test_initial_expired_session_on_connect() {
        let mut dev = VirtualDevice::new();
        dev.configure(r#"{"initialSession":"expired"}"#).unwrap();
        dev.connect().unwrap();
        assert_eq!(dev.session_status(), SessionStatus::Expired);
    }

    #[test]
    fn test_unsent_limit_blocks_new_documents_until_flush() {
        let mut dev = VirtualDevice::new();
        dev.configure(r#"{"maxUnsent":1}"#).unwrap();
        dev.connect().unwrap();
        let orch = Orchestrator::new(Logger::noop());
        assert!(orch.create_receipt(&mut dev, &coffee_receipt()));
        assert!(!orch.create_receipt(&mut dev, &coffee_receipt()));
        assert!(dev.last_error_message().contains("unsent document limit"));

        assert_eq!(dev.flush_unsent(), 1);
        assert_eq!(dev.unsend_counter(), 0);
        assert!(orch.create_receipt(&mut dev, &coffee_receipt()));
        assert_eq!(dev.journal()[1].number, 2);
    }

    #[test]
    fn test_disconnect_voids_open_document() {
        let mut dev = connected();
        dev.open_session().unwrap();
        dev.open_receipt(&Receipt::default()).unwrap();
        dev.disconnect().unwrap();
        assert!(!dev.has_open_document());
        assert_eq!(dev.session_status(), SessionStatus::Unknown);
    }

    #[test]
    fn test_operations_require_connection() {
        let mut dev = VirtualDevice::new();
        assert!(matches!(dev.open_session(), Err(DriverError::NotConnected)));
        assert!(matches!(
            dev.single_payment(PaymentType::Cash, 1),
            Err(DriverError::NotConnected)
        ));
        assert_eq!(dev.last_error_message(), "device is not connected");
    }

    #[test]
    fn test_metadata() {
        let dev = VirtualDevice::new();
        assert_eq!(dev.name(), "Virtual fiscal device");
        assert_eq!(dev.version(), env!("CARGO_PKG_VERSION"));
        assert_eq!(dev.doc_format(), FiscalFormat::Ffd120);
    }
}
