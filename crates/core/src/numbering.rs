//! Human-readable document numbers.
//!
//! Invoices, payment receipts, and treatment plans carry monthly-resetting
//! numbers (`INV-202501-0007`); prescriptions carry an organization-wide
//! running count (`RX000042`). This module holds the pure value logic —
//! formats, parsing, and the scope key the sequence store allocates against.
//! Allocation itself (the atomic counter) lives in infrastructure.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::id::OrganizationId;

/// Kinds of numbered documents issued by a clinic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    PaymentReceipt,
    TreatmentPlan,
    Prescription,
}

impl DocumentKind {
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentKind::Invoice => "INV",
            DocumentKind::PaymentReceipt => "P",
            DocumentKind::TreatmentPlan => "TP",
            DocumentKind::Prescription => "RX",
        }
    }

    /// Whether the sequence resets at each month boundary.
    ///
    /// Prescriptions use an organization-wide running count instead.
    pub fn resets_monthly(self) -> bool {
        !matches!(self, DocumentKind::Prescription)
    }

    /// Minimum zero-padded width of the sequence segment.
    pub fn pad_width(self) -> usize {
        match self {
            DocumentKind::Prescription => 6,
            _ => 4,
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Year + month a monthly-resetting sequence belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequencePeriod {
    pub year: i32,
    pub month: u32,
}

impl SequencePeriod {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }
}

/// Scope key a sequence value is allocated against.
///
/// One counter exists per (organization, kind, period); kinds without a
/// monthly reset have `period: None` and a single organization-wide counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceScope {
    pub organization_id: OrganizationId,
    pub kind: DocumentKind,
    pub period: Option<SequencePeriod>,
}

impl SequenceScope {
    /// Scope for a document of `kind` issued at `at`.
    pub fn for_document(organization_id: OrganizationId, kind: DocumentKind, at: DateTime<Utc>) -> Self {
        let period = kind
            .resets_monthly()
            .then(|| SequencePeriod::from_datetime(at));
        Self {
            organization_id,
            kind,
            period,
        }
    }

    /// Render the document number for a sequence value in this scope.
    pub fn render(&self, seq: u64) -> String {
        match self.period {
            Some(period) => format!(
                "{}-{:04}{:02}-{:0width$}",
                self.kind.prefix(),
                period.year,
                period.month,
                seq,
                width = self.kind.pad_width()
            ),
            None => format!(
                "{}{:0width$}",
                self.kind.prefix(),
                seq,
                width = self.kind.pad_width()
            ),
        }
    }
}

/// Extract the numeric sequence segment of a document number.
///
/// Returns `None` when the string does not carry the expected prefix or the
/// trailing segment is not numeric. Used for validation and tests; allocation
/// never parses existing numbers (that was the original race).
pub fn sequence_of(kind: DocumentKind, number: &str) -> Option<u64> {
    let rest = number.strip_prefix(kind.prefix())?;
    let digits = if kind.resets_monthly() {
        let rest = rest.strip_prefix('-')?;
        let (_period, seq) = rest.split_once('-')?;
        seq
    } else {
        rest
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scope_at(kind: DocumentKind, year: i32, month: u32) -> SequenceScope {
        let at = Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0).unwrap();
        SequenceScope::for_document(OrganizationId::new(), kind, at)
    }

    #[test]
    fn invoice_numbers_are_monthly_and_zero_padded() {
        let scope = scope_at(DocumentKind::Invoice, 2025, 1);
        assert_eq!(scope.render(7), "INV-202501-0007");
        assert_eq!(scope.render(1), "INV-202501-0001");
    }

    #[test]
    fn payment_and_treatment_plan_prefixes() {
        assert_eq!(scope_at(DocumentKind::PaymentReceipt, 2025, 3).render(12), "P-202503-0012");
        assert_eq!(scope_at(DocumentKind::TreatmentPlan, 2024, 11).render(230), "TP-202411-0230");
    }

    #[test]
    fn prescription_numbers_are_running_counts_without_period() {
        let scope = scope_at(DocumentKind::Prescription, 2025, 1);
        assert_eq!(scope.period, None);
        assert_eq!(scope.render(42), "RX000042");

        // Same organization, different month: the scope key is identical, so
        // the counter never resets.
        let org = OrganizationId::new();
        let jan = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap();
        assert_eq!(
            SequenceScope::for_document(org, DocumentKind::Prescription, jan),
            SequenceScope::for_document(org, DocumentKind::Prescription, feb)
        );
    }

    #[test]
    fn sequence_does_not_truncate_beyond_pad_width() {
        let scope = scope_at(DocumentKind::Invoice, 2025, 1);
        assert_eq!(scope.render(12345), "INV-202501-12345");
    }

    #[test]
    fn month_boundary_changes_the_scope() {
        let org = OrganizationId::new();
        let jan = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap();
        let feb = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 1).unwrap();
        let a = SequenceScope::for_document(org, DocumentKind::Invoice, jan);
        let b = SequenceScope::for_document(org, DocumentKind::Invoice, feb);
        assert_ne!(a, b);
        assert_eq!(b.render(1), "INV-202502-0001");
    }

    #[test]
    fn sequence_of_round_trips_rendered_numbers() {
        let scope = scope_at(DocumentKind::Invoice, 2025, 1);
        assert_eq!(sequence_of(DocumentKind::Invoice, &scope.render(7)), Some(7));

        let rx = scope_at(DocumentKind::Prescription, 2025, 1);
        assert_eq!(sequence_of(DocumentKind::Prescription, &rx.render(123)), Some(123));
    }

    #[test]
    fn sequence_of_rejects_foreign_or_malformed_numbers() {
        assert_eq!(sequence_of(DocumentKind::Invoice, "TP-202501-0007"), None);
        assert_eq!(sequence_of(DocumentKind::Invoice, "INV-202501-00x7"), None);
        assert_eq!(sequence_of(DocumentKind::Invoice, "INV-202501"), None);
        assert_eq!(sequence_of(DocumentKind::Prescription, "RX"), None);
    }
}
