//! Outbound authentication. Each scheme is a pure builder transformation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::RequestBuilder;
use reqwest::header::AUTHORIZATION;
use toolrelay_core::capability::AuthScheme;

/// Why credentials could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("credential references unset environment variable '{0}'")]
pub struct MissingCredential(pub String);

/// Apply `scheme` to an outbound request.
///
/// `lookup` resolves `${NAME}` references in credential values.
pub fn apply<F>(builder: RequestBuilder, scheme: &AuthScheme, lookup: F) -> Result<RequestBuilder, MissingCredential>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(match scheme {
        AuthScheme::None => builder,
        AuthScheme::ApiKey { header_name, value } => {
            api_key(builder, header_name, &resolve(value, &lookup)?)
        }
        AuthScheme::Bearer { token } => bearer(builder, &resolve(token, &lookup)?),
        AuthScheme::Basic { user, pass } => {
            basic(builder, &resolve(user, &lookup)?, &resolve(pass, &lookup)?)
        }
    })
}

pub fn api_key(builder: RequestBuilder, header_name: &str, value: &str) -> RequestBuilder {
    builder.header(header_name, value)
}

pub fn bearer(builder: RequestBuilder, token: &str) -> RequestBuilder {
    builder.header(AUTHORIZATION, format!("Bearer {token}"))
}

pub fn basic(builder: RequestBuilder, user: &str, pass: &str) -> RequestBuilder {
    builder.header(AUTHORIZATION, basic_header_value(user, pass))
}

/// `Basic base64(user:pass)`
pub fn basic_header_value(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
}

/// Expand every `${NAME}` in `value`. Text without references is returned as is.
pub fn resolve<F>(value: &str, lookup: &F) -> Result<String, MissingCredential>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let resolved = lookup(name).ok_or_else(|| MissingCredential(name.to_string()))?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
