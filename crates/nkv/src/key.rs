// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache key derivation.
//!
//! A key is built by concatenating the encodings of a rule-directed sequence
//! of request fields, in declaration order. An absent field contributes a
//! fixed 2-byte gap so two different field sets cannot collide by
//! truncation; repeatable headers contribute a 1-byte separator after the
//! last occurrence instead. The method component is normalized to `GET` so
//! every verb addresses the same object.

use crate::http::Request;
use thiserror::Error;

/// Bytes appended for an absent key component.
const GAP: usize = 2;

/// One component of a rule's key recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyComponent {
    /// Normalized method literal (`GET` for every verb).
    Method,
    /// `HTTP` or `HTTPS`.
    Scheme,
    /// Value of the `Host` header.
    Host,
    /// Full request URI.
    Uri,
    /// URI up to the first `?`.
    Path,
    /// A literal `?` when a non-empty query follows.
    Delimiter,
    /// The query string.
    Query,
    /// Value of one named query parameter.
    Param(String),
    /// Values of one named header, all occurrences.
    Header(String),
    /// Value of one named cookie.
    Cookie(String),
    /// Captured body prefix, for hosts that provide one.
    Body,
}

/// Key derivation failure.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("request URI must begin with '/'")]
    BadUri,
}

/// Build the key bytes for `req` under `recipe`.
pub fn build(recipe: &[KeyComponent], req: &Request) -> Result<Vec<u8>, KeyError> {
    if req.uri().first() != Some(&b'/') {
        return Err(KeyError::BadUri);
    }

    let mut key = Vec::with_capacity(64);

    for component in recipe {
        match component {
            KeyComponent::Method => key.extend_from_slice(b"GET"),
            KeyComponent::Scheme => key.extend_from_slice(req.scheme.as_bytes()),
            KeyComponent::Host => append_opt(&mut key, req.header_value("host")),
            KeyComponent::Uri => key.extend_from_slice(req.uri()),
            KeyComponent::Path => append_opt(&mut key, Some(req.path())),
            KeyComponent::Delimiter => {
                if req.has_delimiter() {
                    key.push(b'?');
                } else {
                    advance(&mut key, GAP);
                }
            }
            KeyComponent::Query => {
                match req.query() {
                    Some(q) if !q.is_empty() => key.extend_from_slice(q),
                    _ => advance(&mut key, GAP),
                }
            }
            KeyComponent::Param(name) => append_opt(&mut key, req.query_param(name)),
            KeyComponent::Header(name) => {
                let mut found = false;
                for value in req.header_values(name) {
                    key.extend_from_slice(value);
                    found = true;
                }
                // separator after matches, full gap when the header is absent
                advance(&mut key, if found { 1 } else { GAP });
            }
            KeyComponent::Cookie(name) => append_opt(&mut key, req.cookie(name)),
            KeyComponent::Body => append_opt(&mut key, req.body_prefix_bytes()),
        }
    }

    Ok(key)
}

fn append_opt(key: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(v) if !v.is_empty() => key.extend_from_slice(v),
        _ => advance(key, GAP),
    }
}

fn advance(key: &mut Vec<u8>, n: usize) {
    key.resize(key.len() + n, 0);
}

/// 64-bit FNV-1a over the key bytes.
pub fn hash64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn recipe_default() -> Vec<KeyComponent> {
        vec![
            KeyComponent::Method,
            KeyComponent::Scheme,
            KeyComponent::Host,
            KeyComponent::Uri,
        ]
    }

    #[test]
    fn test_method_normalized_across_verbs() {
        let recipe = recipe_default();
        let get = Request::new(Method::Get, "/a").header("Host", "h");
        let post = Request::new(Method::Post, "/a").header("Host", "h");
        let del = Request::new(Method::Delete, "/a").header("Host", "h");

        let k1 = build(&recipe, &get).expect("key");
        let k2 = build(&recipe, &post).expect("key");
        let k3 = build(&recipe, &del).expect("key");
        assert_eq!(k1, k2);
        assert_eq!(k1, k3);
        assert!(k1.starts_with(b"GETHTTP"));
    }

    #[test]
    fn test_absent_host_leaves_gap() {
        let recipe = recipe_default();
        let with_host = Request::new(Method::Get, "/a").header("Host", "h");
        let without = Request::new(Method::Get, "/a");

        let k1 = build(&recipe, &with_host).expect("key");
        let k2 = build(&recipe, &without).expect("key");
        assert_ne!(k1, k2);
        assert_eq!(&k2[7..9], &[0, 0]);
    }

    #[test]
    fn test_bad_uri_rejected() {
        let recipe = recipe_default();
        let req = Request::new(Method::Get, "nope");
        assert!(matches!(build(&recipe, &req), Err(KeyError::BadUri)));

        let req = Request::new(Method::Get, "");
        assert!(matches!(build(&recipe, &req), Err(KeyError::BadUri)));
    }

    #[test]
    fn test_query_components() {
        let recipe = vec![
            KeyComponent::Path,
            KeyComponent::Delimiter,
            KeyComponent::Query,
        ];
        let req = Request::new(Method::Get, "/p?x=1");
        assert_eq!(build(&recipe, &req).expect("key"), b"/p?x=1".to_vec());

        let req = Request::new(Method::Get, "/p");
        assert_eq!(
            build(&recipe, &req).expect("key"),
            b"/p\0\0\0\0".to_vec()
        );
    }

    #[test]
    fn test_param_component() {
        let recipe = vec![KeyComponent::Param("id".into())];
        let req = Request::new(Method::Get, "/p?id=42&x=1");
        assert_eq!(build(&recipe, &req).expect("key"), b"42".to_vec());

        let req = Request::new(Method::Get, "/p?x=1");
        assert_eq!(build(&recipe, &req).expect("key"), vec![0, 0]);
    }

    #[test]
    fn test_header_component_repeatable() {
        let recipe = vec![KeyComponent::Header("x-tag".into())];
        let req = Request::new(Method::Get, "/")
            .header("X-Tag", "a")
            .header("X-Tag", "b");
        // both values then the 1-byte separator
        assert_eq!(build(&recipe, &req).expect("key"), b"ab\0".to_vec());

        let req = Request::new(Method::Get, "/");
        assert_eq!(build(&recipe, &req).expect("key"), vec![0, 0]);
    }

    #[test]
    fn test_cookie_component() {
        let recipe = vec![KeyComponent::Cookie("sid".into())];
        let req = Request::new(Method::Get, "/").header("Cookie", "a=1; sid=xyz");
        assert_eq!(build(&recipe, &req).expect("key"), b"xyz".to_vec());

        let req = Request::new(Method::Get, "/");
        assert_eq!(build(&recipe, &req).expect("key"), vec![0, 0]);
    }

    #[test]
    fn test_gap_prevents_truncation_collisions() {
        let recipe = vec![
            KeyComponent::Param("a".into()),
            KeyComponent::Param("b".into()),
        ];
        // a="x", b absent  vs  a absent, b="x"
        let r1 = Request::new(Method::Get, "/?a=x");
        let r2 = Request::new(Method::Get, "/?b=x");
        assert_ne!(
            build(&recipe, &r1).expect("key"),
            build(&recipe, &r2).expect("key")
        );
    }

    #[test]
    fn test_hash64_stability() {
        assert_eq!(hash64(b"abc"), hash64(b"abc"));
        assert_ne!(hash64(b"abc"), hash64(b"abd"));
        // FNV-1a 64 reference vector
        assert_eq!(hash64(b""), 0xcbf2_9ce4_8422_2325);
    }
}
