//! Light level source backed by the InfluxDB 2.x query API.
//!
//! One Flux query per sample: the trailing window is aggregated to one point
//! per second and reduced to the last value. The CSV answer is scanned for the
//! `_value` column of the final row.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lumen_core::LightSource;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use tracing::{debug, info};

/// Identifies one sensor's series: bucket, measurement, field and one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesKey {
    pub bucket: String,
    pub measurement: String,
    pub field: String,
    pub tag_key: String,
    pub tag_value: String,
}

fn flux_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '$' => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Build the Flux query for the latest value of `series` within `window`.
pub fn flux_query(series: &SeriesKey, window: Duration) -> String {
    format!(
        "from(bucket: {bucket})\n\
         \x20 |> range(start: -{secs}s)\n\
         \x20 |> filter(fn: (r) => r[\"_measurement\"] == {measurement})\n\
         \x20 |> filter(fn: (r) => r[\"_field\"] == {field})\n\
         \x20 |> filter(fn: (r) => r[{tag_key}] == {tag_value})\n\
         \x20 |> aggregateWindow(every: 1s, fn: last, createEmpty: false)\n\
         \x20 |> last()\n\
         \x20 |> yield(name: \"last\")",
        bucket = flux_string(&series.bucket),
        secs = window.as_secs().max(1),
        measurement = flux_string(&series.measurement),
        field = flux_string(&series.field),
        tag_key = flux_string(&series.tag_key),
        tag_value = flux_string(&series.tag_value),
    )
}

/// Extract the `_value` of the last data row from a (possibly annotated) CSV
/// query response. `None` when the response holds no rows.
///
/// Tables are separated by blank lines and each starts with its own header
/// row; only that row decides which column holds the value.
pub fn parse_last_value(body: &str) -> Result<Option<f64>> {
    let body = body.replace("\r\n", "\n");
    let mut last = None;

    for table in body.split("\n\n").filter(|t| !t.trim().is_empty()) {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(table.as_bytes());
        let headers = reader.headers().context("malformed CSV in query response")?.clone();

        if let Some(col) = headers.iter().position(|f| f == "_value") {
            for record in reader.records() {
                let record = record.context("malformed CSV in query response")?;
                let raw = record.get(col).unwrap_or_default();
                let value: f64 = raw
                    .parse()
                    .with_context(|| format!("non-numeric light level {:?}", raw))?;
                last = Some(value);
            }
        } else if let Some(col) = headers.iter().position(|f| f == "error") {
            let message = match reader.records().next() {
                Some(record) => {
                    let record = record.context("malformed CSV in query response")?;
                    record.get(col).unwrap_or_default().to_string()
                }
                None => "unknown".to_string(),
            };
            return Err(anyhow!("query error: {}", message));
        }
    }
    Ok(last)
}

pub struct InfluxSource {
    client: Client,
    base: Url,
    org: String,
    token: String,
    query: String,
}

impl InfluxSource {
    pub fn new(
        url: &str,
        org: impl Into<String>,
        token: impl Into<String>,
        series: &SeriesKey,
        window: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let base = Url::parse(url).with_context(|| format!("invalid InfluxDB url {:?}", url))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base,
            org: org.into(),
            token: token.into(),
            query: flux_query(series, window),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, path)).context("invalid InfluxDB endpoint")
    }

    /// Ping `/health`; used once at startup where an unreachable backend is fatal.
    pub async fn check_health(&self) -> Result<()> {
        let url = self.endpoint("health")?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("InfluxDB at {} unreachable", self.base))?;
        if !response.status().is_success() {
            return Err(anyhow!("InfluxDB health check at {} failed: {}", url, response.status()));
        }
        info!(url = %self.base, "connected to InfluxDB");
        Ok(())
    }
}

#[async_trait]
impl LightSource for InfluxSource {
    async fn latest_lux(&self) -> Result<Option<f64>> {
        let url = self.endpoint("api/v2/query")?;
        let response = self
            .client
            .post(url)
            .query(&[("org", self.org.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(self.query.clone())
            .send()
            .await
            .context("InfluxDB query request failed")?;

        let status = response.status();
        let body = response.text().await.context("failed to read InfluxDB response")?;
        if !status.is_success() {
            return Err(anyhow!("InfluxDB query failed: {}: {}", status, body.trim()));
        }
        let value = parse_last_value(&body)?;
        debug!(?value, "light level query");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn series() -> SeriesKey {
        SeriesKey {
            bucket: "Flat-Prod".into(),
            measurement: "ambient_light_level".into(),
            field: "intensity".into(),
            tag_key: "device".into(),
            tag_value: "living-room-1".into(),
        }
    }

    #[test]
    fn query_filters_series() {
        let q = flux_query(&series(), Duration::from_secs(30));
        assert!(q.starts_with("from(bucket: \"Flat-Prod\")"));
        assert!(q.contains("|> range(start: -30s)"));
        assert!(q.contains("r[\"_measurement\"] == \"ambient_light_level\""));
        assert!(q.contains("r[\"_field\"] == \"intensity\""));
        assert!(q.contains("r[\"device\"] == \"living-room-1\""));
        assert!(q.contains("aggregateWindow(every: 1s, fn: last, createEmpty: false)"));
        assert!(q.ends_with("|> yield(name: \"last\")"));
    }

    #[test]
    fn query_escapes_strings() {
        let mut s = series();
        s.tag_value = "a\"b\\c${x}".into();
        let q = flux_query(&s, Duration::from_secs(30));
        assert!(q.contains(r#"== "a\"b\\c\${x}""#), "{}", q);
    }

    #[test]
    fn parses_annotated_csv() {
        let body = "\
#group,false,false,true,true,false,false,true,true,true
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string
#default,last,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,device
,,0,2024-01-01T00:00:00Z,2024-01-01T00:00:30Z,2024-01-01T00:00:29Z,312.5,intensity,ambient_light_level,living-room-1

";
        assert_eq!(parse_last_value(body).unwrap(), Some(312.5));
    }

    #[test]
    fn parses_plain_csv_and_takes_last_table() {
        let body = "\
,result,table,_time,_value
,last,0,2024-01-01T00:00:28Z,10

,result,table,_time,_value
,last,1,2024-01-01T00:00:29Z,20
";
        assert_eq!(parse_last_value(body).unwrap(), Some(20.0));
    }

    #[test]
    fn empty_response_has_no_value() {
        assert_eq!(parse_last_value("").unwrap(), None);
        assert_eq!(parse_last_value("\r\n").unwrap(), None);
    }

    #[test]
    fn data_cells_named_like_headers_are_data() {
        let body = "\
,result,table,_value,state
,,0,10,error
,,0,20,_value
,,0,30,ok
";
        assert_eq!(parse_last_value(body).unwrap(), Some(30.0));
    }

    #[test]
    fn crlf_tables_are_split() {
        let body = ",result,table,_value\r\n,,0,10\r\n\r\n,result,table,_value\r\n,,1,11.5\r\n\r\n";
        assert_eq!(parse_last_value(body).unwrap(), Some(11.5));
    }

    #[test]
    fn rejects_non_numeric_and_error_tables() {
        assert!(parse_last_value(",result,table,_value\n,,0,bright\n").is_err());
        assert!(parse_last_value("error,reference\nbucket not found,404\n").is_err());
    }

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = String::new();
            // Read until the body (the flux query) has arrived.
            while !request.contains("yield") {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: text/csv\r\ncontent-length: {}\r\n\
                 connection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            request
        });
        (format!("http://{}", addr), handle)
    }

    fn source(url: &str, token: &str) -> InfluxSource {
        let window = Duration::from_secs(30);
        InfluxSource::new(url, "home", token, &series(), window, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn queries_backend() {
        let (url, server) = serve_once("200 OK", ",result,table,_value\n,last,0,87.25\n").await;
        let source = source(&url, "s3cr3t");

        assert_eq!(source.latest_lux().await.unwrap(), Some(87.25));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/v2/query?org=home "));
        assert!(request.to_lowercase().contains("authorization: token s3cr3t"));
        assert!(request.contains("application/vnd.flux"));
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let (url, _server) = serve_once("401 Unauthorized", "{\"code\":\"unauthorized\"}").await;
        let source = source(&url, "bad");

        let err = source.latest_lux().await.unwrap_err();
        assert!(err.to_string().contains("401"), "{err:#}");
    }
}
