use reqwest::{multipart, Method};
use serde_json::Value;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::gateway::ApiGateway;
use crate::identity::UploadReadingForm;
use crate::model::{MeterReading, MeterType, ReadingList};

use super::page_query;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub meter_type: Option<MeterType>,
    /// Only honoured by the all-readings listing.
    pub verified: Option<bool>,
}

impl ReadingFilter {
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut q = page_query(self.skip, self.limit);
        if let Some(t) = self.meter_type { q.push(("meter_type", t.as_str().to_string())); }
        if let Some(v) = self.verified { q.push(("verified", v.to_string())); }
        q
    }
}

#[derive(Clone)]
pub struct ReadingsApi {
    gateway: ApiGateway,
}

impl ReadingsApi {
    pub fn new(gateway: ApiGateway) -> Self { Self { gateway } }

    /// Validates the form, then posts value and photo as multipart.
    pub async fn upload(&self, form: &UploadReadingForm) -> AppResult<MeterReading> {
        let upload = form.validate()?;
        let bytes = tokio::fs::read(&upload.image).await?;
        let part = multipart::Part::bytes(bytes)
            .file_name(upload.file_name.clone())
            .mime_str(upload.mime)
            .map_err(|e| AppError::validation("unsupported_image".to_string(), e.to_string()))?;
        let body = multipart::Form::new()
            .text("meter_type", upload.meter_type.as_str())
            .text("reading_value", upload.reading_value.to_string())
            .part("image", part);
        let reading: MeterReading = self.gateway.send_multipart("/meter-readings/upload", body).await?;
        info!(target: "meterbill", "uploaded reading id={} type={} value={}", reading.id, reading.meter_type, reading.reading_value);
        Ok(reading)
    }

    pub async fn my_readings(&self, filter: &ReadingFilter) -> AppResult<ReadingList> {
        // the per-user listing has no verified filter
        let filter = ReadingFilter { verified: None, ..filter.clone() };
        self.gateway.send(Method::GET, "/meter-readings/my-readings", None, &filter.to_query()).await
    }

    pub async fn all_readings(&self, filter: &ReadingFilter) -> AppResult<ReadingList> {
        self.gateway.send(Method::GET, "/meter-readings/all", None, &filter.to_query()).await
    }

    pub async fn get(&self, id: i64) -> AppResult<MeterReading> {
        self.gateway.send(Method::GET, &format!("/meter-readings/{}", id), None, &[]).await
    }

    pub async fn verify(&self, id: i64) -> AppResult<MeterReading> {
        self.gateway.send(Method::PATCH, &format!("/meter-readings/{}/verify", id), None, &[]).await
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        let _: Value = self.gateway.request(Method::DELETE, &format!("/meter-readings/{}", id), None, &[]).await?;
        info!(target: "meterbill", "deleted reading id={}", id);
        Ok(())
    }
}
