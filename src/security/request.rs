// Request Header Helpers
// Origin, host, client IP and user agent extraction from inbound headers

use axum::http::{HeaderMap, HeaderName, header};

pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const CF_CONNECTING_IP: HeaderName = HeaderName::from_static("cf-connecting-ip");

/// Header value as a trimmed, non-empty string
fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// First entry of a comma-separated proxy header
fn first_listed<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    header_str(headers, name)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn request_origin(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, &header::ORIGIN)
}

/// Host the request was addressed to, preferring the proxy's view
pub fn request_host(headers: &HeaderMap) -> Option<&str> {
    if header_str(headers, &X_FORWARDED_HOST).is_some() {
        return first_listed(headers, &X_FORWARDED_HOST);
    }
    header_str(headers, &header::HOST)
}

/// Client IP from proxy headers
pub fn request_ip(headers: &HeaderMap) -> Option<&str> {
    if header_str(headers, &X_FORWARDED_FOR).is_some() {
        return first_listed(headers, &X_FORWARDED_FOR);
    }
    header_str(headers, &X_REAL_IP).or_else(|| header_str(headers, &CF_CONNECTING_IP))
}

pub fn user_agent(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, &header::USER_AGENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        map
    }

    #[test]
    fn test_origin_and_user_agent() {
        let map = headers(&[
            ("origin", "https://app.example"),
            ("user-agent", "curl/8.0"),
        ]);
        assert_eq!(request_origin(&map), Some("https://app.example"));
        assert_eq!(user_agent(&map), Some("curl/8.0"));
        assert_eq!(request_origin(&HeaderMap::new()), None);
    }

    #[test]
    fn test_forwarded_host_wins_over_host() {
        let map = headers(&[
            ("x-forwarded-host", "public.example, internal.local"),
            ("host", "internal.local:8080"),
        ]);
        assert_eq!(request_host(&map), Some("public.example"));

        let map = headers(&[("host", "internal.local:8080")]);
        assert_eq!(request_host(&map), Some("internal.local:8080"));
    }

    #[test]
    fn test_ip_precedence() {
        let map = headers(&[
            ("x-forwarded-for", " 203.0.113.7 , 10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(request_ip(&map), Some("203.0.113.7"));

        let map = headers(&[("x-real-ip", "10.0.0.2"), ("cf-connecting-ip", "10.0.0.3")]);
        assert_eq!(request_ip(&map), Some("10.0.0.2"));

        let map = headers(&[("cf-connecting-ip", "10.0.0.3")]);
        assert_eq!(request_ip(&map), Some("10.0.0.3"));

        assert_eq!(request_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_empty_proxy_headers_fall_through() {
        let map = headers(&[("x-forwarded-host", ""), ("host", "app.example")]);
        assert_eq!(request_host(&map), Some("app.example"));

        let map = headers(&[("x-forwarded-for", "  "), ("x-real-ip", "10.0.0.2")]);
        assert_eq!(request_ip(&map), Some("10.0.0.2"));
    }

    #[test]
    fn test_empty_values_read_as_absent() {
        let map = headers(&[("origin", ""), ("x-forwarded-for", " , 10.0.0.1")]);
        assert_eq!(request_origin(&map), None);
        assert_eq!(request_ip(&map), None);
    }
}
