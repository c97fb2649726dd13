use reqwest::Method;
use tracing::info;

use crate::error::AppResult;
use crate::gateway::ApiGateway;
use crate::model::{Invoice, InvoiceList, InvoiceSummary};

use super::page_query;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceFilter {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub paid: Option<bool>,
    /// Only honoured by the all-invoices listing.
    pub user_id: Option<i64>,
}

impl InvoiceFilter {
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut q = page_query(self.skip, self.limit);
        if let Some(p) = self.paid { q.push(("paid", p.to_string())); }
        if let Some(u) = self.user_id { q.push(("user_id", u.to_string())); }
        q
    }
}

#[derive(Clone)]
pub struct InvoicesApi {
    gateway: ApiGateway,
}

impl InvoicesApi {
    pub fn new(gateway: ApiGateway) -> Self { Self { gateway } }

    pub async fn my_invoices(&self, filter: &InvoiceFilter) -> AppResult<InvoiceList> {
        let filter = InvoiceFilter { user_id: None, ..filter.clone() };
        self.gateway.send(Method::GET, "/invoices/my-invoices", None, &filter.to_query()).await
    }

    pub async fn all_invoices(&self, filter: &InvoiceFilter) -> AppResult<InvoiceList> {
        self.gateway.send(Method::GET, "/invoices/all", None, &filter.to_query()).await
    }

    pub async fn summary(&self) -> AppResult<InvoiceSummary> {
        self.gateway.send(Method::GET, "/invoices/summary", None, &[]).await
    }

    /// Invoices for every verified reading that has none yet.
    pub async fn generate_all(&self) -> AppResult<Vec<Invoice>> {
        let created: Vec<Invoice> = self.gateway.send(Method::POST, "/invoices/generate-all", None, &[]).await?;
        info!(target: "meterbill", "generated {} invoices", created.len());
        Ok(created)
    }

    pub async fn generate_for_user(&self, user_id: i64) -> AppResult<Vec<Invoice>> {
        let created: Vec<Invoice> = self
            .gateway
            .send(Method::POST, &format!("/invoices/generate-for-user/{}", user_id), None, &[])
            .await?;
        info!(target: "meterbill", "generated {} invoices for user_id={}", created.len(), user_id);
        Ok(created)
    }

    pub async fn mark_paid(&self, id: i64) -> AppResult<Invoice> {
        let invoice: Invoice = self.gateway.send(Method::PATCH, &format!("/invoices/{}/pay", id), None, &[]).await?;
        info!(target: "meterbill", "invoice {} marked paid", invoice.invoice_number);
        Ok(invoice)
    }

    pub async fn get(&self, id: i64) -> AppResult<Invoice> {
        self.gateway.send(Method::GET, &format!("/invoices/{}", id), None, &[]).await
    }
}
