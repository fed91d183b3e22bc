use super::loader::{ConfigError, EngineConfig};

/// Validate the complete engine configuration.
///
/// Checks sane ranges on numeric parameters so the service refuses to
/// start with a configuration that would silently misbehave (e.g. a
/// zero-capacity fetch semaphore that deadlocks every request).
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_llm(config, &mut errors);
    validate_ratelimit(config, &mut errors);
    validate_search(config, &mut errors);
    validate_fetch(config, &mut errors);
    validate_pdf(config, &mut errors);
    validate_persistence(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_llm(config: &EngineConfig, errors: &mut Vec<String>) {
    let l = &config.system.llm;

    if l.provider != "local" && l.provider != "openai_compatible" {
        errors.push(format!(
            "llm.provider must be \"local\" or \"openai_compatible\", got \"{}\"",
            l.provider
        ));
    }
    if l.default_model.is_empty() {
        errors.push("llm.default_model must not be empty".into());
    }
    if l.reason_model.is_empty() {
        errors.push("llm.reason_model must not be empty".into());
    }
    if l.fallback_model.is_empty() {
        errors.push("llm.fallback_model must not be empty".into());
    }
    if l.local_base_url.is_empty() && l.provider == "local" {
        errors.push("llm.local_base_url must not be empty when llm.provider = \"local\"".into());
    }
    if l.openai_base_url.is_empty() && l.provider == "openai_compatible" {
        errors.push(
            "llm.openai_base_url must not be empty when llm.provider = \"openai_compatible\""
                .into(),
        );
    }
}

fn validate_ratelimit(_config: &EngineConfig, _errors: &mut [String]) {
    // Any integer is valid: `<= 0` is the documented "disabled" sentinel,
    // not an error.
}

fn validate_search(config: &EngineConfig, errors: &mut Vec<String>) {
    let s = &config.system.search;

    if s.base_url.is_empty() {
        errors.push("search.base_url must not be empty".into());
    }
    if s.max_results == 0 {
        errors.push("search.max_results must be > 0".into());
    }
}

fn validate_fetch(config: &EngineConfig, errors: &mut Vec<String>) {
    let f = &config.system.fetch;

    if f.concurrent_limit == 0 {
        errors.push("fetch.concurrent_limit must be > 0".into());
    }
    if f.cool_down < 0.0 {
        errors.push("fetch.cool_down must be >= 0".into());
    }
    if f.use_reader && f.reader_base_url.is_empty() {
        errors.push("fetch.reader_base_url must not be empty when fetch.use_reader is true".into());
    }
    if f.max_html_length == 0 {
        errors.push("fetch.max_html_length must be > 0".into());
    }
    if f.max_eval_time == 0 {
        errors.push("fetch.max_eval_time must be > 0".into());
    }
}

fn validate_pdf(config: &EngineConfig, errors: &mut Vec<String>) {
    let p = &config.system.pdf;

    if p.max_pages == 0 {
        errors.push("pdf.max_pages must be > 0".into());
    }
    if p.max_filesize == 0 {
        errors.push("pdf.max_filesize must be > 0".into());
    }
    if p.timeout == 0 {
        errors.push("pdf.timeout must be > 0".into());
    }
}

fn validate_persistence(config: &EngineConfig, errors: &mut Vec<String>) {
    let p = &config.system.persistence;

    if p.database_url.is_empty() {
        errors.push("persistence.database_url must not be empty".into());
    }
    if p.db_name.is_empty() {
        errors.push("persistence.db_name must not be empty".into());
    }
}
