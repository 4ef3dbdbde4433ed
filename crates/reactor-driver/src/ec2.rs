use std::collections::BTreeMap;
use std::process::Command as StdCommand;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use quick_xml::{events::Event as XmlEvent, Reader as XmlReader};
use reactor_domain::{Instance, InstanceId};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::driver::{CloudDriver, StartParams};
use crate::error::DriverError;

type HmacSha256 = Hmac<Sha256>;

/// Static configuration for the EC2 driver, injected at startup. Per-instance
/// launch parameters (AMI, instance type, security groups) come from each
/// endpoint's `cloud_config` instead, since one driver instance serves every
/// endpoint configured for the `ec2` cloud.
#[derive(Clone)]
pub struct Ec2DriverConfig {
    pub default_region: String,
}

#[derive(Clone)]
struct BaseUrls {
    ec2: String,
}

impl BaseUrls {
    fn for_region(region: &str) -> Self {
        Self { ec2: format!("https://ec2.{}.amazonaws.com", region) }
    }
}

#[derive(Clone, Debug)]
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

#[async_trait]
trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<AwsCredentials, DriverError>;
}

struct StaticCredentialsProvider {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials, DriverError> {
        Ok(AwsCredentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
        })
    }
}

/// EC2 IMDSv2-backed credentials, cached for 10 minutes.
struct ImdsCredentialsProvider {
    client: reqwest::Client,
    cache: tokio::sync::Mutex<Option<(AwsCredentials, Instant)>>,
}

#[async_trait]
impl CredentialsProvider for ImdsCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials, DriverError> {
        {
            let guard = self.cache.lock().await;
            if let Some((creds, expiry)) = guard.as_ref() {
                if Instant::now() < *expiry {
                    return Ok(creds.clone());
                }
            }
        }

        let token_resp = self
            .client
            .put("http://169.254.169.254/latest/api/token")
            .header("X-aws-ec2-metadata-token-ttl-seconds", "21600")
            .send()
            .await
            .map_err(|e| DriverError::Internal(format!("IMDSv2 token request: {}", e)))?;
        let imds_token = token_resp
            .text()
            .await
            .map_err(|e| DriverError::Internal(format!("IMDSv2 token decode: {}", e)))?;

        let roles_resp = self
            .client
            .get("http://169.254.169.254/latest/meta-data/iam/security-credentials/")
            .header("X-aws-ec2-metadata-token", &imds_token)
            .send()
            .await
            .map_err(|e| DriverError::Internal(format!("IMDS roles request: {}", e)))?;
        let roles_text = roles_resp.text().await.unwrap_or_default();
        let role_name = roles_text.lines().next().unwrap_or("").to_string();
        if role_name.is_empty() {
            return Err(DriverError::Internal("IMDS: no IAM role found".into()));
        }

        let creds_url = format!(
            "http://169.254.169.254/latest/meta-data/iam/security-credentials/{}",
            role_name
        );
        let resp: Value = self
            .client
            .get(&creds_url)
            .header("X-aws-ec2-metadata-token", &imds_token)
            .send()
            .await
            .map_err(|e| DriverError::Internal(format!("IMDS creds request: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Internal(format!("IMDS creds decode: {}", e)))?;

        let creds = AwsCredentials {
            access_key_id: resp["AccessKeyId"].as_str().unwrap_or("").to_string(),
            secret_access_key: resp["SecretAccessKey"].as_str().unwrap_or("").to_string(),
            session_token: resp["Token"].as_str().map(str::to_string),
        };

        let expiry = Instant::now() + Duration::from_secs(600);
        *self.cache.lock().await = Some((creds.clone(), expiry));
        Ok(creds)
    }
}

struct AwsCliCredentialsProvider;

#[async_trait]
impl CredentialsProvider for AwsCliCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials, DriverError> {
        let output = StdCommand::new("aws")
            .args(["sts", "get-session-token", "--duration-seconds", "3600", "--output", "json"])
            .output()
            .map_err(|e| {
                DriverError::Internal(format!(
                    "aws CLI not found: {}. Install AWS CLI or configure credentials via env vars.",
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Internal(format!(
                "aws sts get-session-token failed: {}. Run 'aws configure' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DriverError::Internal(format!("aws CLI output parse: {}", e)))?;

        let creds = &resp["Credentials"];
        Ok(AwsCredentials {
            access_key_id: creds["AccessKeyId"].as_str().unwrap_or("").to_string(),
            secret_access_key: creds["SecretAccessKey"].as_str().unwrap_or("").to_string(),
            session_token: creds["SessionToken"].as_str().map(str::to_string),
        })
    }
}

// ── SigV4 signing ─────────────────────────────────────────────────────────────

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn url_host(url: &str) -> &str {
    let without_scheme = url.trim_start_matches("https://").trim_start_matches("http://");
    match without_scheme.find('/') {
        Some(pos) => &without_scheme[..pos],
        None => without_scheme,
    }
}

fn sigv4_headers(
    method: &str,
    uri_path: &str,
    query_string: &str,
    content_type: &str,
    body: &[u8],
    creds: &AwsCredentials,
    region: &str,
    service: &str,
    host: &str,
) -> BTreeMap<String, String> {
    let now = Utc::now();
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let payload_hash = sha256_hex(body);

    let mut canon_hdrs: BTreeMap<String, String> = BTreeMap::new();
    canon_hdrs.insert("content-type".into(), content_type.into());
    canon_hdrs.insert("host".into(), host.into());
    canon_hdrs.insert("x-amz-content-sha256".into(), payload_hash.clone());
    canon_hdrs.insert("x-amz-date".into(), timestamp.clone());
    if let Some(ref token) = creds.session_token {
        canon_hdrs.insert("x-amz-security-token".into(), token.clone());
    }

    let signed_headers: String = canon_hdrs.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_headers: String =
        canon_hdrs.iter().map(|(k, v)| format!("{}:{}\n", k, v.trim())).collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, uri_path, query_string, canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        timestamp,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date, region, service);
    let signature = hmac_sha256(&signing_key, string_to_sign.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    let auth = format!(
        "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
        creds.access_key_id, scope, signed_headers, signature
    );

    let mut out = BTreeMap::new();
    out.insert("Authorization".into(), auth);
    out.insert("x-amz-date".into(), timestamp);
    out.insert("x-amz-content-sha256".into(), payload_hash);
    if let Some(ref token) = creds.session_token {
        out.insert("x-amz-security-token".into(), token.clone());
    }
    out
}

mod urlencoding {
    pub fn encode(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(byte as char)
                }
                b' ' => out.push('+'),
                b => out.push_str(&format!("%{:02X}", b)),
            }
        }
        out
    }
}

// ── XML helpers ───────────────────────────────────────────────────────────────

fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_tag = false;
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if !in_tag && e.local_name().as_ref() == tag_bytes {
                    in_tag = true;
                    depth = 0;
                } else if in_tag {
                    depth += 1;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if in_tag {
                    if depth == 0 {
                        return None;
                    }
                    depth -= 1;
                }
            }
            Ok(XmlEvent::Text(e)) if in_tag && depth == 0 => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    None
}

fn xml_all_texts(xml: &str, tag: &str) -> Vec<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut result = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if depth == 0 && e.local_name().as_ref() == tag_bytes {
                    depth = 1;
                } else if depth > 0 {
                    depth += 1;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if depth > 0 {
                    depth -= 1;
                }
            }
            Ok(XmlEvent::Text(e)) if depth == 1 => {
                if let Ok(s) = e.unescape() {
                    result.push(s.into_owned());
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    result
}

fn xml_error_code(xml: &str) -> String {
    xml_text(xml, "Code").unwrap_or_else(|| "Unknown".into())
}

fn xml_error_message(xml: &str) -> String {
    xml_text(xml, "Message").unwrap_or_else(|| "unknown error".into())
}

// ── Ec2Driver ─────────────────────────────────────────────────────────────────

/// EC2 cloud backend via hand-signed SigV4 Query-protocol requests. Only the
/// three calls the cloud driver contract needs: `DescribeInstances`,
/// `RunInstances`, `TerminateInstances`. Does not touch VPC, IAM, or
/// Organizations — EC2 driver configs are assumed to name an existing
/// subnet/security group.
pub struct Ec2Driver {
    config: Ec2DriverConfig,
    client: reqwest::Client,
    creds: Box<dyn CredentialsProvider>,
    base: BaseUrls,
}

impl Ec2Driver {
    /// Auto-selects credentials: env vars, then IMDSv2, then AWS CLI.
    pub async fn new(config: Ec2DriverConfig) -> Result<Self, DriverError> {
        let client = reqwest::Client::new();
        let base = BaseUrls::for_region(&config.default_region);

        let creds: Box<dyn CredentialsProvider> = if let (Ok(key), Ok(secret)) = (
            std::env::var("AWS_ACCESS_KEY_ID"),
            std::env::var("AWS_SECRET_ACCESS_KEY"),
        ) {
            Box::new(StaticCredentialsProvider {
                access_key_id: key,
                secret_access_key: secret,
                session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            })
        } else {
            let imds_probe = client
                .get("http://169.254.169.254/latest/api/token")
                .header("X-aws-ec2-metadata-token-ttl-seconds", "10")
                .timeout(Duration::from_secs(2))
                .send()
                .await;
            if imds_probe.is_ok() {
                Box::new(ImdsCredentialsProvider { client: client.clone(), cache: tokio::sync::Mutex::new(None) })
            } else {
                Box::new(AwsCliCredentialsProvider)
            }
        };

        Ok(Self { config, client, creds, base })
    }

    #[cfg(test)]
    pub(crate) fn with_test_config(
        config: Ec2DriverConfig,
        base_url: String,
        creds: impl CredentialsProvider + 'static,
    ) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            creds: Box::new(creds),
            base: BaseUrls { ec2: base_url },
        }
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<String, DriverError> {
        let creds = self.creds.credentials().await?;
        let host = url_host(&self.base.ec2).to_string();
        let url = format!("{}/", self.base.ec2.trim_end_matches('/'));

        let body_str = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let body_bytes = body_str.as_bytes();

        let ct = "application/x-www-form-urlencoded; charset=utf-8";
        let sig_headers = sigv4_headers(
            "POST", "/", "", ct, body_bytes, &creds, &self.config.default_region, "ec2", &host,
        );

        let mut req = self.client.post(&url).header("Content-Type", ct).body(body_bytes.to_vec());
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DriverError::Internal(format!("POST {} failed: {}", url, e)))?;

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();

        if status >= 400 {
            return Err(DriverError::Internal(format!(
                "{}: {} — {}",
                self.base.ec2,
                xml_error_code(&text),
                xml_error_message(&text)
            )));
        }
        Ok(text)
    }

    /// Pull `ami`, `instance_type`, `security_group_ids`, `subnet_id`,
    /// `key_name` out of an endpoint's `cloud_config`.
    fn extract_launch_params(config: &serde_json::Value) -> Result<Vec<(String, String)>, DriverError> {
        let ami = config["ami"]
            .as_str()
            .ok_or_else(|| DriverError::StartFailed("cloud_config missing 'ami'".into()))?;
        let instance_type = config["instance_type"].as_str().unwrap_or("t3.micro");

        let mut params = vec![
            ("ImageId".to_string(), ami.to_string()),
            ("InstanceType".to_string(), instance_type.to_string()),
            ("MinCount".to_string(), "1".to_string()),
            ("MaxCount".to_string(), "1".to_string()),
        ];
        if let Some(subnet) = config["subnet_id"].as_str() {
            params.push(("SubnetId".to_string(), subnet.to_string()));
        }
        if let Some(key) = config["key_name"].as_str() {
            params.push(("KeyName".to_string(), key.to_string()));
        }
        if let Some(groups) = config["security_group_ids"].as_array() {
            for (i, g) in groups.iter().enumerate() {
                if let Some(id) = g.as_str() {
                    params.push((format!("SecurityGroupId.{}", i + 1), id.to_string()));
                }
            }
        }
        Ok(params)
    }
}

#[async_trait]
impl CloudDriver for Ec2Driver {
    fn name(&self) -> &'static str {
        "ec2"
    }

    async fn list_instances(
        &self,
        cloud_config: &serde_json::Value,
    ) -> Result<Vec<Instance>, DriverError> {
        let filter_value = cloud_config["ami"].as_str().unwrap_or("");
        let xml = self
            .query(&[
                ("Action", "DescribeInstances"),
                ("Version", "2016-11-15"),
                ("Filter.1.Name", "image-id"),
                ("Filter.1.Value.1", filter_value),
                ("Filter.2.Name", "instance-state-name"),
                ("Filter.2.Value.1", "pending"),
                ("Filter.2.Value.2", "running"),
            ])
            .await?;

        let ids = xml_all_texts(&xml, "instanceId");
        let launch_times = xml_all_texts(&xml, "launchTime");
        let private_ips = xml_all_texts(&xml, "privateIpAddress");
        let public_ips = xml_all_texts(&xml, "ipAddress");

        let mut instances: Vec<Instance> = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let mut addresses = Vec::new();
                if let Some(ip) = private_ips.get(i) {
                    addresses.push(ip.clone());
                }
                if let Some(ip) = public_ips.get(i) {
                    addresses.push(ip.clone());
                }
                let created = launch_times
                    .get(i)
                    .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                Instance { id: InstanceId::new(id.clone()), name: id, addresses, created }
            })
            .collect();

        instances.sort_by_key(|i| i.created);
        Ok(instances)
    }

    async fn start_instance(&self, params: &StartParams) -> Result<Instance, DriverError> {
        info!(endpoint = %params.endpoint_name, "EC2: RunInstances");
        let launch_params = Self::extract_launch_params(&params.config)?;
        let mut query_params: Vec<(&str, &str)> =
            vec![("Action", "RunInstances"), ("Version", "2016-11-15")];
        query_params.extend(launch_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let xml = self.query(&query_params).await?;
        let id = xml_text(&xml, "instanceId")
            .ok_or_else(|| DriverError::StartFailed("RunInstances: no instanceId in response".into()))?;

        Ok(Instance {
            name: id.clone(),
            id: InstanceId::new(id),
            addresses: Vec::new(),
            created: Utc::now(),
        })
    }

    async fn delete_instance(
        &self,
        _cloud_config: &serde_json::Value,
        id: &str,
    ) -> Result<(), DriverError> {
        info!(instance = id, "EC2: TerminateInstances");
        self.query(&[
            ("Action", "TerminateInstances"),
            ("Version", "2016-11-15"),
            ("InstanceId.1", id),
        ])
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_creds() -> impl CredentialsProvider {
        StaticCredentialsProvider {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        }
    }

    #[tokio::test]
    async fn describe_instances_parses_reservation_set() {
        let server = wiremock::MockServer::start().await;
        let xml = r#"<DescribeInstancesResponse>
            <reservationSet><item><instancesSet><item>
                <instanceId>i-1</instanceId>
                <privateIpAddress>10.0.0.1</privateIpAddress>
                <launchTime>2024-01-01T00:00:00.000Z</launchTime>
            </item></instancesSet></item></reservationSet>
        </DescribeInstancesResponse>"#;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(xml))
            .mount(&server)
            .await;

        let driver = Ec2Driver::with_test_config(
            Ec2DriverConfig { default_region: "us-east-1".into() },
            server.uri(),
            test_creds(),
        );
        let instances = driver.list_instances(&serde_json::json!({"ami": "ami-1"})).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id.as_str(), "i-1");
        assert_eq!(instances[0].addresses, vec!["10.0.0.1".to_string()]);
    }

    #[tokio::test]
    async fn run_instances_requires_ami() {
        let driver = Ec2Driver::with_test_config(
            Ec2DriverConfig { default_region: "us-east-1".into() },
            "http://localhost:1".into(),
            test_creds(),
        );
        let err = driver
            .start_instance(&StartParams { endpoint_name: "web".into(), config: serde_json::json!({}) })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::StartFailed(_)));
    }
}
