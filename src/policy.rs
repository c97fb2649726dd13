//! Role gating for views and actions.
//!
//! Every role comparison in the client lives here. The answers only decide which actions
//! are offered; the API enforces its own rules and may still refuse.

use chrono::{DateTime, Utc};

use crate::model::{Invoice, MeterReading, Role, UserProfile};

pub fn can_upload_reading(user: &UserProfile) -> bool {
    matches!(user.role, Role::Resident | Role::Admin)
}

pub fn can_verify_reading(user: &UserProfile, reading: &MeterReading) -> bool {
    is_staff(user) && !reading.verified
}

/// Admins delete anything, everyone else only their own readings.
pub fn can_delete_reading(user: &UserProfile, reading: &MeterReading) -> bool {
    user.role == Role::Admin || reading.user_id == user.id
}

/// Managers never pay.
pub fn can_pay_invoice(user: &UserProfile, invoice: &Invoice) -> bool {
    !invoice.paid && matches!(user.role, Role::Resident | Role::Admin)
}

pub fn can_view_all_readings(user: &UserProfile) -> bool { is_staff(user) }
pub fn can_view_all_invoices(user: &UserProfile) -> bool { is_staff(user) }
pub fn can_generate_invoices(user: &UserProfile) -> bool { is_staff(user) }

pub fn is_overdue(invoice: &Invoice, now: DateTime<Utc>) -> bool {
    !invoice.paid && invoice.due_date < now
}

fn is_staff(user: &UserProfile) -> bool {
    matches!(user.role, Role::Manager | Role::Admin)
}

/// Actions offered by the client, for callers that gate generically.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    UploadReading,
    VerifyReading(&'a MeterReading),
    DeleteReading(&'a MeterReading),
    PayInvoice(&'a Invoice),
    ViewAllReadings,
    ViewAllInvoices,
    GenerateInvoices,
}

impl Action<'_> {
    pub fn permits(&self, user: &UserProfile) -> bool {
        match self {
            Action::UploadReading => can_upload_reading(user),
            Action::VerifyReading(r) => can_verify_reading(user, r),
            Action::DeleteReading(r) => can_delete_reading(user, r),
            Action::PayInvoice(i) => can_pay_invoice(user, i),
            Action::ViewAllReadings => can_view_all_readings(user),
            Action::ViewAllInvoices => can_view_all_invoices(user),
            Action::GenerateInvoices => can_generate_invoices(user),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::UploadReading => "upload readings",
            Action::VerifyReading(_) => "verify this reading",
            Action::DeleteReading(_) => "delete this reading",
            Action::PayInvoice(_) => "pay this invoice",
            Action::ViewAllReadings => "view all readings",
            Action::ViewAllInvoices => "view all invoices",
            Action::GenerateInvoices => "generate invoices",
        }
    }
}

/// Counts shown above an invoice list.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InvoiceTally {
    pub total: usize,
    pub paid: usize,
    pub pending: usize,
    pub total_amount: f64,
}

impl InvoiceTally {
    pub fn of(invoices: &[Invoice]) -> Self {
        let paid = invoices.iter().filter(|i| i.paid).count();
        InvoiceTally {
            total: invoices.len(),
            paid,
            pending: invoices.len() - paid,
            total_amount: invoices.iter().map(|i| i.amount).sum(),
        }
    }
}
