//! Typed wrappers over the billing endpoints. All traffic goes through `ApiGateway`, so a
//! rejected credential anywhere here ends the session.

mod readings;
mod invoices;

pub use readings::{ReadingFilter, ReadingsApi};
pub use invoices::{InvoiceFilter, InvoicesApi};

/// Default page size used by the list views.
pub const DEFAULT_LIMIT: u32 = 100;

fn page_query(skip: Option<u32>, limit: Option<u32>) -> Vec<(&'static str, String)> {
    let mut q = Vec::new();
    if let Some(s) = skip { q.push(("skip", s.to_string())); }
    q.push(("limit", limit.unwrap_or(DEFAULT_LIMIT).to_string()));
    q
}
