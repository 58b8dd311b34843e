use std::path::PathBuf;
use std::sync::Arc;

use hyper::Method;
use url::Url;

use crate::capture::{CaptureOptions, HarDefaults, HarFetch, HarTarget};
use crate::error::{Error, Result};
use crate::fetch::{Client, FetchRequest, RedirectPolicy};
use crate::har::{create_har_log, parse_har_file, Har, PageInfo, SharedHarLog};
use crate::transport::{HyperTransport, SharedTransport, TransportConfig};

/// Options for one captured request from the command line.
pub struct FetchCommandOptions {
    pub url: String,
    pub method: Option<String>,
    pub headers: Vec<String>,
    pub data: Option<String>,
    pub output: Option<PathBuf>,
    pub append: bool,
    pub page_ref: String,
    pub follow: bool,
    pub max_redirects: usize,
    pub compress: bool,
    pub user_agent: String,
    pub capture: CaptureOptions,
    pub transport: TransportConfig,
}

pub fn run_fetch(options: &FetchCommandOptions) -> Result<()> {
    let request = build_request(options)?;
    let log = open_log(options)?;

    let transport: SharedTransport = Arc::new(HyperTransport::new(options.transport.clone())?);
    let client = Client::from_shared(transport.clone()).with_user_agent(options.user_agent.clone());
    let har = HarFetch::builder(client)
        .shared_transport(transport)
        .defaults(HarDefaults {
            har: HarTarget::Log(log.clone()),
            page_ref: Some(options.page_ref.clone()),
            on_har_entry: None,
            capture: options.capture.clone(),
        })
        .build()?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| Error::InvalidArgs(format!("Failed to start runtime: {err}")))?;
    let captured = log.len();
    let summary = runtime.block_on(async {
        let response = har.fetch(request).await?;
        let time = response.har_entry().map(|entry| entry.time).unwrap_or_default();
        Ok::<_, Error>(format!(
            "{} {} {}",
            response.status().as_u16(),
            response.url(),
            format_millis(time)
        ))
    })?;

    match &options.output {
        Some(path) => log.write_to(path)?,
        None => println!("{}", serde_json::to_string_pretty(&log.snapshot())?),
    }
    eprintln!("{} ({} entries captured)", summary, log.len() - captured);
    Ok(())
}

fn build_request(options: &FetchCommandOptions) -> Result<FetchRequest> {
    let url = Url::parse(&options.url)?;
    let method = match (&options.method, &options.data) {
        (Some(method), _) => Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::InvalidArgs(format!("Invalid method '{method}'")))?,
        (None, Some(_)) => Method::POST,
        (None, None) => Method::GET,
    };

    let mut request = FetchRequest::new(method, url);
    for raw in &options.headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value)?;
    }
    if let Some(data) = &options.data {
        if !request.headers.contains_key(hyper::header::CONTENT_TYPE) {
            request = request.header("content-type", "application/x-www-form-urlencoded")?;
        }
        request = request.body(data.clone());
    }

    request.options.redirect = if options.follow {
        RedirectPolicy::Follow
    } else {
        RedirectPolicy::Manual
    };
    request.options.max_redirects = options.max_redirects;
    request.options.compress = options.compress;
    Ok(request)
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    let (name, value) = raw.split_once(':').ok_or_else(|| {
        Error::InvalidArgs(format!("Header '{raw}' must be in the form 'Name: value'"))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgs("Header name cannot be empty".to_string()));
    }
    Ok((name, value.trim()))
}

fn open_log(options: &FetchCommandOptions) -> Result<SharedHarLog> {
    let page = PageInfo::default().id(options.page_ref.clone());
    let existing = match &options.output {
        Some(path) if options.append && path.exists() => Some(parse_har_file(path)?),
        _ => None,
    };
    let har = match existing {
        Some(mut har) => {
            ensure_page(&mut har, page);
            har
        }
        None => create_har_log(Vec::new(), page),
    };
    Ok(SharedHarLog::new(har))
}

fn ensure_page(har: &mut Har, page: PageInfo) {
    let id = page.id.clone().unwrap_or_default();
    if har.log.pages.iter().any(|existing| existing.id == id) {
        return;
    }
    har.log
        .pages
        .extend(create_har_log(Vec::new(), page).log.pages);
}

fn format_millis(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.1}ms", ms)
    }
}
