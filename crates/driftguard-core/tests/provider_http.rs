//! Scan-and-clean over the real REST adapters against a mock server.

use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use driftguard_core::cloud::aws::{AwsConfig, S3Api};
use driftguard_core::cloud::azure::{AzureConfig, BlobApi, API_VERSION};
use driftguard_core::cloud::gcp::{GcpConfig, GcsApi};
use driftguard_core::cloud::{CloudAdapter, StorageAdapter};
use driftguard_core::RetryPolicy;

fn gcs(server: &MockServer) -> StorageAdapter<GcsApi> {
    let config = GcpConfig {
        project: "demo".into(),
        access_token: "ya29.test".into(),
        endpoint: None,
    }
    .with_endpoint(server.uri());
    StorageAdapter::new(GcsApi::new(config).unwrap()).with_retry(RetryPolicy::none())
}

#[tokio::test]
async fn test_gcs_expired_bucket_is_drained_and_deleted() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/storage/v1/b"))
        .and(query_param("project", "demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"name": "driftguard-pr-12", "timeCreated": "2024-01-01T00:00:00Z"},
                {"name": "analytics-raw"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/driftguard-pr-12"))
        .and(query_param("fields", "labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labels": {"driftguard-expiry": "2000-01-01"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/analytics-raw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    // First listing returns one object version, the second an empty bucket.
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/driftguard-pr-12/o"))
        .and(query_param("versions", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"name": "logs/run.txt", "generation": "1700000000"}]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/driftguard-pr-12/o"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/storage/v1/b/driftguard-pr-12/o/logs%2Frun.txt"))
        .and(query_param("generation", "1700000000"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/storage/v1/b/driftguard-pr-12"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let report = gcs(&server).scan_and_clean(false).await.unwrap();

    assert_eq!(report.deleted, vec!["driftguard-pr-12".to_string()]);
    assert_eq!(report.outside_prefix, 1);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_gcs_bucket_gone_at_delete_is_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/storage/v1/b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"name": "driftguard-racy"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/driftguard-racy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labels": {"driftguard-expiry": "2001-01-01"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/driftguard-racy/o"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/storage/v1/b/driftguard-racy"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "The specified bucket does not exist."}
        })))
        .mount(&server)
        .await;

    let report = gcs(&server).scan_and_clean(false).await.unwrap();

    assert_eq!(report.deleted, vec!["driftguard-racy".to_string()]);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_gcs_dry_run_sends_no_deletes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/storage/v1/b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"name": "driftguard-old"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/driftguard-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labels": {"driftguard-expiry": "2001-01-01"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let report = gcs(&server).scan_and_clean(true).await.unwrap();

    assert_eq!(report.planned, vec!["driftguard-old".to_string()]);
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

fn s3(server: &MockServer) -> StorageAdapter<S3Api> {
    let config = AwsConfig {
        access_key_id: "AKIDEXAMPLE".into(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG".into(),
        session_token: None,
        region: "us-east-1".into(),
        endpoint: None,
    }
    .with_endpoint(server.uri());
    StorageAdapter::new(S3Api::new(config).unwrap()).with_retry(RetryPolicy::none())
}

fn bucket_listing(names: &[&str]) -> String {
    let buckets: String = names
        .iter()
        .map(|n| {
            format!(
                "<Bucket><Name>{}</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>",
                n
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ListAllMyBucketsResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><Owner><ID>abc</ID></Owner><Buckets>{}</Buckets></ListAllMyBucketsResult>",
        buckets
    )
}

fn tagging(pairs: &[(&str, &str)]) -> String {
    let tags: String = pairs
        .iter()
        .map(|(k, v)| format!("<Tag><Key>{}</Key><Value>{}</Value></Tag>", k, v))
        .collect();
    format!("<Tagging><TagSet>{}</TagSet></Tagging>", tags)
}

const EMPTY_VERSIONS: &str =
    "<ListVersionsResult><Name>b</Name><IsTruncated>false</IsTruncated></ListVersionsResult>";

async fn mount_s3_tags(server: &MockServer, bucket: &str, pairs: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", bucket)))
        .and(query_param("tagging", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(tagging(pairs)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_s3_scan_drains_expired_and_spares_protected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-date"))
        .and(header("x-amz-content-sha256", "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bucket_listing(&[
            "driftguard-pr-3",
            "driftguard-locked",
            "driftguard-bare",
            "billing-exports",
        ])))
        .mount(&server)
        .await;

    mount_s3_tags(&server, "driftguard-pr-3", &[("driftguard-expiry", "2000-01-01")]).await;
    mount_s3_tags(
        &server,
        "driftguard-locked",
        &[("driftguard-expiry", "2000-01-01"), ("Protected", "true")],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/driftguard-bare"))
        .and(query_param("tagging", ""))
        .respond_with(ResponseTemplate::new(404).set_body_string(
            "<Error><Code>NoSuchTagSet</Code><Message>The TagSet does not exist</Message></Error>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/billing-exports"))
        .respond_with(ResponseTemplate::new(200).set_body_string(tagging(&[])))
        .expect(0)
        .mount(&server)
        .await;

    // One live version plus a delete marker, then nothing left.
    Mock::given(method("GET"))
        .and(path("/driftguard-pr-3"))
        .and(query_param("versions", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<ListVersionsResult><Name>driftguard-pr-3</Name>\
             <Version><Key>logs/run.txt</Key><VersionId>v1</VersionId></Version>\
             <DeleteMarker><Key>old.txt</Key><VersionId>m1</VersionId></DeleteMarker>\
             </ListVersionsResult>",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/driftguard-pr-3"))
        .and(query_param("versions", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_VERSIONS))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/driftguard-pr-3/logs/run.txt"))
        .and(query_param("versionId", "v1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/driftguard-pr-3/old.txt"))
        .and(query_param("versionId", "m1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/driftguard-pr-3"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/driftguard-locked"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/driftguard-locked"))
        .and(query_param("versions", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_VERSIONS))
        .expect(0)
        .mount(&server)
        .await;

    let report = s3(&server).scan_and_clean(false).await.unwrap();

    assert_eq!(report.examined, 4);
    assert_eq!(report.outside_prefix, 1);
    assert_eq!(report.deleted, vec!["driftguard-pr-3".to_string()]);
    assert_eq!(report.protected, vec!["driftguard-locked".to_string()]);
    assert_eq!(report.untagged, vec!["driftguard-bare".to_string()]);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_s3_dry_run_sends_no_deletes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bucket_listing(&["driftguard-old"])))
        .mount(&server)
        .await;
    mount_s3_tags(&server, "driftguard-old", &[("driftguard-expiry", "2001-01-01")]).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let report = s3(&server).scan_and_clean(true).await.unwrap();

    assert_eq!(report.planned, vec!["driftguard-old".to_string()]);
    assert!(report.deleted.is_empty());
}

#[tokio::test]
async fn test_s3_bucket_gone_at_delete_is_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bucket_listing(&["driftguard-racy"])))
        .mount(&server)
        .await;
    mount_s3_tags(&server, "driftguard-racy", &[("driftguard-expiry", "2001-01-01")]).await;
    Mock::given(method("GET"))
        .and(path("/driftguard-racy"))
        .and(query_param("versions", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_VERSIONS))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/driftguard-racy"))
        .respond_with(ResponseTemplate::new(404).set_body_string(
            "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let report = s3(&server).scan_and_clean(false).await.unwrap();

    assert_eq!(report.deleted, vec!["driftguard-racy".to_string()]);
    assert!(report.failures.is_empty());
}

// ---------------------------------------------------------------------------
// Azure Blob
// ---------------------------------------------------------------------------

fn azure(server: &MockServer) -> StorageAdapter<BlobApi> {
    let config = AzureConfig {
        account: "devaccount".into(),
        token: "aad-token".into(),
        endpoint: None,
    }
    .with_endpoint(server.uri());
    StorageAdapter::new(BlobApi::new(config).unwrap()).with_retry(RetryPolicy::none())
}

async fn mount_container_listing(server: &MockServer, names: &[&str]) {
    let containers: String = names
        .iter()
        .map(|n| {
            format!(
                "<Container><Name>{}</Name><Properties><Last-Modified>Mon, 01 Jan 2024 00:00:00 GMT</Last-Modified></Properties></Container>",
                n
            )
        })
        .collect();
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<EnumerationResults ServiceEndpoint=\"https://devaccount.blob.core.windows.net/\"><Containers>{}</Containers></EnumerationResults>",
        containers
    );
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("comp", "list"))
        .and(header("authorization", "Bearer aad-token"))
        .and(header("x-ms-version", API_VERSION))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_metadata(server: &MockServer, container: &str, meta: &[(&str, &str)]) {
    let mut response = ResponseTemplate::new(200);
    for (k, v) in meta {
        response = response.insert_header(format!("x-ms-meta-{}", k).as_str(), *v);
    }
    Mock::given(method("GET"))
        .and(path(format!("/{}", container)))
        .and(query_param("restype", "container"))
        .and(query_param("comp", "metadata"))
        .respond_with(response)
        .mount(server)
        .await;
}

const EMPTY_BLOBS: &str = "<EnumerationResults><Blobs></Blobs></EnumerationResults>";

#[tokio::test]
async fn test_azure_scan_drains_versions_and_spares_protected() {
    let server = MockServer::start().await;

    mount_container_listing(&server, &["driftguard-pr-9", "driftguard-prod", "tfstate"]).await;
    mount_metadata(&server, "driftguard-pr-9", &[("driftguard_expiry", "2000-01-01")]).await;
    mount_metadata(
        &server,
        "driftguard-prod",
        &[("driftguard_expiry", "2000-01-01"), ("environment", "production")],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/tfstate"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // Current version plus one older version of the same blob.
    Mock::given(method("GET"))
        .and(path("/driftguard-pr-9"))
        .and(query_param("comp", "list"))
        .and(query_param("include", "versions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<EnumerationResults><Blobs>\
             <Blob><Name>state.json</Name><VersionId>2024-02-01T00:00:00.0000000Z</VersionId><IsCurrentVersion>true</IsCurrentVersion></Blob>\
             <Blob><Name>state.json</Name><VersionId>2024-01-01T00:00:00.0000000Z</VersionId></Blob>\
             </Blobs></EnumerationResults>",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/driftguard-pr-9"))
        .and(query_param("comp", "list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BLOBS))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/driftguard-pr-9/state.json"))
        .and(header("x-ms-delete-snapshots", "include"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/driftguard-pr-9/state.json"))
        .and(query_param("versionid", "2024-01-01T00:00:00.0000000Z"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/driftguard-pr-9"))
        .and(query_param("restype", "container"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/driftguard-prod"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let report = azure(&server).scan_and_clean(false).await.unwrap();

    assert_eq!(report.examined, 3);
    assert_eq!(report.outside_prefix, 1);
    assert_eq!(report.deleted, vec!["driftguard-pr-9".to_string()]);
    assert_eq!(report.protected, vec!["driftguard-prod".to_string()]);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_azure_dry_run_sends_no_deletes() {
    let server = MockServer::start().await;

    mount_container_listing(&server, &["driftguard-old"]).await;
    mount_metadata(&server, "driftguard-old", &[("driftguard_expiry", "2001-01-01")]).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let report = azure(&server).scan_and_clean(true).await.unwrap();

    assert_eq!(report.planned, vec!["driftguard-old".to_string()]);
}

#[tokio::test]
async fn test_azure_container_gone_at_delete_is_success() {
    let server = MockServer::start().await;

    mount_container_listing(&server, &["driftguard-racy"]).await;
    mount_metadata(&server, "driftguard-racy", &[("driftguard_expiry", "2001-01-01")]).await;
    Mock::given(method("GET"))
        .and(path("/driftguard-racy"))
        .and(query_param("comp", "list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BLOBS))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/driftguard-racy"))
        .and(query_param("restype", "container"))
        .respond_with(
            ResponseTemplate::new(404).insert_header("x-ms-error-code", "ContainerNotFound"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let report = azure(&server).scan_and_clean(false).await.unwrap();

    assert_eq!(report.deleted, vec!["driftguard-racy".to_string()]);
    assert!(report.failures.is_empty());
}
