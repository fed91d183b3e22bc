use url::Url;

/// Host-only, lowercased, port-stripped domain key used by the Scheduler's
/// per-domain mutex and cooldown map. Uses the `url` crate rather than a
/// manual string split so bracketed IPv6 hosts and explicit ports are
/// handled the same way `urlparse(url).hostname` does upstream.
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// True when the URL's path ends in `.pdf`. This is only half of the PDF
/// branch decision (§4.3): `Fetcher::fetch_uncached` also HEAD-probes the
/// URL's `Content-Type` and treats `application/pdf` as a PDF regardless
/// of the path, for extensionless download links.
pub fn looks_like_pdf_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .map(|u| u.path().to_lowercase().ends_with(".pdf"))
        .unwrap_or_else(|| url.to_lowercase().ends_with(".pdf"))
}
