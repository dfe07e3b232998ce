//! HTTP client for an upstream MTConnect agent: the current/assets/sample
//! session sequence, multipart streaming, and the `ErrorCode`-keyed
//! recovery table (§4.11).

pub mod error;
pub mod response;

pub use error::{AdapterError, ParseError};
pub use response::{ResponseDocument, ResponseEntity, ResponseError};

use std::sync::Arc;
use std::time::Duration;

use device_model::DeviceModel;
use futures_util::StreamExt;
use log::{info, warn};
use pipeline::PipelineContract;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub source_id: String,
    pub base_url: String,
    pub device: Option<String>,
    pub count: u32,
    pub heartbeat_ms: u64,
    pub interval_ms: u64,
    pub reconnect_interval: Duration,
}

pub struct AgentAdapter {
    config: AdapterConfig,
    client: Client,
}

impl AgentAdapter {
    pub fn new(config: AdapterConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Runs the session loop until `cancel` fires. Mirrors the connector's
    /// retry policy: every failure except `ADAPTER_FAILED` is retried after
    /// `reconnectInterval`.
    pub async fn run(&self, model: &DeviceModel, contract: Arc<dyn PipelineContract>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.session(model, &contract, &cancel).await {
                Ok(()) => return,
                Err(AdapterError::AdapterFailed(reason)) => {
                    warn!("adapter {} failed permanently: {reason}", self.config.source_id);
                    contract.source_failed(&self.config.source_id);
                    return;
                }
                Err(err) => warn!("adapter {} session error: {err}", self.config.source_id),
            }

            contract.deliver_connect_status(&self.config.source_id, &[], false);

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn session(
        &self,
        model: &DeviceModel,
        contract: &Arc<dyn PipelineContract>,
        cancel: &CancellationToken,
    ) -> Result<(), AdapterError> {
        'restart: loop {
            let mut last_instance_id: Option<u64> = None;
            let mut next = self.fetch_current(model, contract, &mut last_instance_id).await?;
            self.fetch_assets(model, contract).await?;

            contract.deliver_connect_status(&self.config.source_id, &[], true);

            loop {
                match self.fetch_sample_stream(model, contract, &mut last_instance_id, &mut next, cancel).await {
                    Ok(()) => return Ok(()),
                    Err(AdapterError::InstanceIdChanged { .. }) => continue 'restart,
                    Err(AdapterError::RestartStream(reason)) => {
                        warn!("sample stream restarted ({reason}), resuming from next={next}");
                        continue;
                    }
                    Err(AdapterError::StreamClosed) => {
                        contract.deliver_connect_status(&self.config.source_id, &[], false);
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                            _ = cancel.cancelled() => return Ok(()),
                        }
                        if next != 0 {
                            continue;
                        }
                        continue 'restart;
                    }
                    Err(AdapterError::MultipartStreamFailed(reason)) => {
                        warn!("multipart stream failed ({reason}), falling back to polling /sample");
                        return self.poll_sample_fallback(model, contract, &mut next, cancel).await;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    fn scoped_url(&self, path: &str) -> String {
        match &self.config.device {
            Some(device) => format!("{}/{device}{path}", self.config.base_url),
            None => format!("{}{path}", self.config.base_url),
        }
    }

    async fn fetch_current(
        &self,
        model: &DeviceModel,
        contract: &Arc<dyn PipelineContract>,
        last_instance_id: &mut Option<u64>,
    ) -> Result<u64, AdapterError> {
        let url = self.scoped_url("/current");
        let body = self.client.get(&url).send().await.map_err(AdapterError::RetryRequest)?.text().await.map_err(AdapterError::RetryRequest)?;
        let doc = response::parse_response(&body, model)?;
        deliver_entities(contract, &doc);
        *last_instance_id = doc.instance_id;
        Ok(doc.next.unwrap_or(0))
    }

    async fn fetch_assets(&self, model: &DeviceModel, contract: &Arc<dyn PipelineContract>) -> Result<(), AdapterError> {
        let url = format!("{}?count={}", self.scoped_url("/assets"), self.config.count);
        let body = self.client.get(&url).send().await.map_err(AdapterError::RetryRequest)?.text().await.map_err(AdapterError::RetryRequest)?;
        let doc = response::parse_response(&body, model)?;
        deliver_entities(contract, &doc);
        if !doc.asset_events.is_empty() {
            self.fetch_asset_events(model, contract, &doc.asset_events).await?;
        }
        Ok(())
    }

    async fn fetch_asset_events(
        &self,
        model: &DeviceModel,
        contract: &Arc<dyn PipelineContract>,
        events: &[device_model::AssetEvent],
    ) -> Result<(), AdapterError> {
        let ids = events.iter().map(|e| e.asset_id.as_str()).collect::<Vec<_>>().join(";");
        let url = format!("{}/{ids}", self.scoped_url("/assets"));
        let body = self.client.get(&url).send().await.map_err(AdapterError::RetryRequest)?.text().await.map_err(AdapterError::RetryRequest)?;
        let doc = response::parse_response(&body, model)?;
        deliver_entities(contract, &doc);
        Ok(())
    }

    async fn fetch_sample_stream(
        &self,
        model: &DeviceModel,
        contract: &Arc<dyn PipelineContract>,
        last_instance_id: &mut Option<u64>,
        next: &mut u64,
        cancel: &CancellationToken,
    ) -> Result<(), AdapterError> {
        let url = format!(
            "{}?from={}&count={}&heartbeat={}&interval={}",
            self.scoped_url("/sample"),
            next,
            self.config.count,
            self.config.heartbeat_ms,
            self.config.interval_ms
        );
        let response = self.client.get(&url).send().await.map_err(AdapterError::RetryRequest)?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let Some(boundary) = multipart_boundary(&content_type) else {
            return Err(AdapterError::MultipartStreamFailed(format!("unexpected content-type: {content_type}")));
        };

        let marker = format!("--{boundary}");
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { return Err(AdapterError::StreamClosed) };
                    let chunk = chunk.map_err(AdapterError::RetryRequest)?;
                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    while let Some(part) = take_part(&mut buffer, &marker) {
                        if part.trim().is_empty() {
                            continue;
                        }
                        let xml = strip_mime_headers(&part);
                        let doc = response::parse_response(xml, model)?;

                        if !doc.errors.is_empty() {
                            let message = doc.errors.iter().map(|e| e.message.clone()).collect::<Vec<_>>().join("; ");
                            return Err(AdapterError::RestartStream(message));
                        }
                        if let (Some(prev), Some(current)) = (*last_instance_id, doc.instance_id) {
                            if prev != current {
                                return Err(AdapterError::InstanceIdChanged { previous: prev, current });
                            }
                        }

                        deliver_entities(contract, &doc);
                        if !doc.asset_events.is_empty() {
                            self.fetch_asset_events(model, contract, &doc.asset_events).await?;
                        }
                        if let Some(n) = doc.next {
                            *next = n;
                        }
                        if let Some(id) = doc.instance_id {
                            *last_instance_id = Some(id);
                        }
                    }
                }
            }
        }
    }

    async fn poll_sample_fallback(
        &self,
        model: &DeviceModel,
        contract: &Arc<dyn PipelineContract>,
        next: &mut u64,
        cancel: &CancellationToken,
    ) -> Result<(), AdapterError> {
        loop {
            let url = format!("{}?from={}&count={}", self.scoped_url("/sample"), next, self.config.count);
            let body = self.client.get(&url).send().await.map_err(AdapterError::RetryRequest)?.text().await.map_err(AdapterError::RetryRequest)?;
            let doc = response::parse_response(&body, model)?;
            deliver_entities(contract, &doc);
            if let Some(n) = doc.next {
                *next = n;
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.config.interval_ms)) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}

fn deliver_entities(contract: &Arc<dyn PipelineContract>, doc: &ResponseDocument) {
    for entity in &doc.entities {
        match entity {
            ResponseEntity::Observation(obs) => {
                if let Some(obs) = contract.check_duplicate(obs.clone()) {
                    contract.deliver_observation(obs);
                }
            }
            ResponseEntity::AssetCommand(command) => contract.deliver_asset_command(command.clone()),
        }
    }
    for event in &doc.asset_events {
        contract.deliver_asset_event(event.clone());
    }
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    if !content_type.contains("multipart/x-mixed-replace") {
        return None;
    }
    content_type.split(';').find_map(|segment| segment.trim().strip_prefix("boundary=").map(|b| b.trim_matches('"').to_string()))
}

/// Pulls the next complete MIME part out of `buffer`, if a full boundary
/// delimiter has arrived, leaving any unconsumed trailing bytes in place.
fn take_part(buffer: &mut String, marker: &str) -> Option<String> {
    let first = buffer.find(marker)?;
    let after_first = first + marker.len();
    let second = buffer[after_first..].find(marker)?;
    let part = buffer[after_first..after_first + second].to_string();
    *buffer = buffer[after_first + second..].to_string();
    Some(part)
}

fn strip_mime_headers(part: &str) -> &str {
    match part.find("\r\n\r\n").or_else(|| part.find("\n\n")) {
        Some(idx) => {
            let sep_len = if part[idx..].starts_with("\r\n\r\n") { 4 } else { 2 };
            &part[idx + sep_len..]
        }
        None => part,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_boundary_from_content_type() {
        let ct = "multipart/x-mixed-replace; boundary=Frontier";
        assert_eq!(multipart_boundary(ct), Some("Frontier".to_string()));
    }

    #[test]
    fn non_multipart_content_type_yields_none() {
        assert_eq!(multipart_boundary("text/xml"), None);
    }

    #[test]
    fn takes_one_part_at_a_time() {
        let mut buffer = String::from("--B\r\nContent-type: text/xml\r\n\r\n<a/>\r\n--B\r\nContent-type: text/xml\r\n\r\n<b/>\r\n--B");
        let first = take_part(&mut buffer, "--B").unwrap();
        assert_eq!(strip_mime_headers(&first), "<a/>\r\n");
        let second = take_part(&mut buffer, "--B").unwrap();
        assert_eq!(strip_mime_headers(&second), "<b/>\r\n");
        assert!(take_part(&mut buffer, "--B").is_none());
    }
}
