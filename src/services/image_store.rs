use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::ObjectStorageSettings;

type HmacSha256 = Hmac<Sha256>;

const AWS_URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// S3 caps presigned URL lifetimes at 7 days.
const MAX_PRESIGN_TTL_SECS: u64 = 604_800;

/// S3-compatible client that resolves question image keys to presigned
/// download URLs. The bot only ever reads images; uploads are done by the
/// question-bank tooling.
#[derive(Clone, Debug)]
pub struct ImageStoreClient {
    bucket: String,
    region: String,
    endpoint: Url,
    access_key: String,
    secret_key: String,
    prefix: String,
}

impl ImageStoreClient {
    pub fn new(settings: ObjectStorageSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .unwrap_or_else(|| "https://storage.yandexcloud.net".to_string());

        let endpoint = Url::parse(&endpoint).context("Invalid object storage endpoint URL")?;
        if endpoint.host_str().is_none() {
            bail!("Object storage endpoint must include a host");
        }
        if endpoint.scheme() != "https" && endpoint.scheme() != "http" {
            bail!(
                "Invalid endpoint scheme: {}. Must be http or https.",
                endpoint.scheme()
            );
        }

        Ok(Self {
            bucket: settings.bucket,
            region: settings.region,
            access_key: settings.access_key,
            secret_key: settings.secret_key,
            endpoint,
            prefix: sanitize_prefix(&settings.images_prefix),
        })
    }

    /// Builds an AWS SigV4 query-presigned GET URL for `key`, valid for
    /// `ttl` (clamped to the S3 maximum).
    pub fn presigned_image_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let ttl_secs = ttl.as_secs().min(MAX_PRESIGN_TTL_SECS) as u32;
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let object_key = self.full_key(key);
        let canonical_uri = self.canonical_uri(&object_key);

        let mut params = BTreeMap::new();
        params.insert("X-Amz-Algorithm".into(), "AWS4-HMAC-SHA256".into());
        params.insert(
            "X-Amz-Credential".into(),
            format!("{}/{}", self.access_key, scope),
        );
        params.insert("X-Amz-Date".into(), amz_date.clone());
        params.insert("X-Amz-Expires".into(), ttl_secs.to_string());
        params.insert("X-Amz-SignedHeaders".into(), "host".into());

        let canonical_query = canonical_query_string(&params);
        let host = self
            .endpoint
            .host_str()
            .ok_or_else(|| anyhow!("Object storage endpoint missing host"))?
            .to_lowercase();

        let canonical_headers = format!("host:{}\n", host);
        let signed_headers = "host";
        let payload_hash = "UNSIGNED-PAYLOAD";

        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let hashed_canonical_request = Sha256::digest(canonical_request.as_bytes());
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(hashed_canonical_request)
        );

        let signing_key = derive_signing_key(&self.secret_key, &date_stamp, &self.region, "s3");
        let signature = hex::encode(hmac_sign(&signing_key, string_to_sign.as_bytes()));

        let mut final_query = params;
        final_query.insert("X-Amz-Signature".into(), signature);
        let query_with_signature = canonical_query_string(&final_query);

        let mut url = self.endpoint.clone();
        url.set_path(&format!("{}/{}", self.bucket, encode_key(&object_key)));
        url.set_query(Some(&query_with_signature));

        Ok(url.to_string())
    }

    fn full_key(&self, key: &str) -> String {
        let cleaned = key.trim_matches('/');
        if self.prefix.is_empty() {
            cleaned.to_string()
        } else if cleaned.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, cleaned)
        }
    }

    fn canonical_uri(&self, key: &str) -> String {
        format!("/{}/{}", self.bucket, encode_key(key))
    }
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, AWS_URI_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, AWS_URI_ENCODE_SET),
                utf8_percent_encode(value, AWS_URI_ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let mut key = format!("AWS4{}", secret).into_bytes();
    key = hmac_sign(&key, date);
    key = hmac_sign(&key, region);
    key = hmac_sign(&key, service);
    hmac_sign(&key, b"aws4_request")
}

fn hmac_sign(key: &[u8], message: impl AsRef<[u8]>) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message.as_ref());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(endpoint: &str) -> ObjectStorageSettings {
        ObjectStorageSettings {
            bucket: "quiz-media".into(),
            region: "us-east-1".into(),
            endpoint: Some(endpoint.into()),
            access_key: "key".into(),
            secret_key: "secret".into(),
            images_prefix: "quiz-images".into(),
        }
    }

    #[test]
    fn test_invalid_scheme_rejected() {
        let result = ImageStoreClient::new(settings("ftp://example.com"));
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_without_host_rejected() {
        let result = ImageStoreClient::new(settings("https://"));
        assert!(result.is_err());
    }

    #[test]
    fn test_presigned_url_shape() {
        let client = ImageStoreClient::new(settings("https://storage.example.com")).unwrap();
        let url = client
            .presigned_image_url("capitals/q1/question.png", Duration::from_secs(3600))
            .unwrap();

        assert!(url.starts_with("https://storage.example.com/quiz-media/quiz-images/capitals/q1/question.png?"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn test_presign_ttl_is_clamped() {
        let client = ImageStoreClient::new(settings("https://storage.example.com")).unwrap();
        let url = client
            .presigned_image_url("k", Duration::from_secs(MAX_PRESIGN_TTL_SECS * 2))
            .unwrap();
        assert!(url.contains(&format!("X-Amz-Expires={}", MAX_PRESIGN_TTL_SECS)));
    }

    #[test]
    fn test_prefix_is_sanitized() {
        let mut s = settings("https://storage.example.com");
        s.images_prefix = "/a//b/".into();
        let client = ImageStoreClient::new(s).unwrap();
        let url = client
            .presigned_image_url("c.png", Duration::from_secs(60))
            .unwrap();
        assert!(url.contains("/quiz-media/a/b/c.png?"));
    }
}
