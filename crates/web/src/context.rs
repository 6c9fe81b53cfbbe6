//! What a route handler learns about the route it was matched by.
//!
//! - `RouteContext`: the path parameters and the request content
//! - `PathParams`: the named segments captured from the request path

use matchit::Params;

/// The context a route handler is invoked with, next to the request itself.
///
/// The lifetimes tie the context to the route table (`'server`) and to the request
/// being served (`'req`).
#[derive(Debug)]
pub struct RouteContext<'server, 'req> {
    path_params: PathParams<'server, 'req>,
    content: &'req [u8],
}

impl<'server, 'req> RouteContext<'server, 'req> {
    pub fn new(path_params: PathParams<'server, 'req>, content: &'req [u8]) -> Self {
        Self { path_params, content }
    }

    pub fn path_params(&self) -> &PathParams<'server, 'req> {
        &self.path_params
    }

    /// Shorthand for `path_params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&'req str> {
        self.path_params.get(name)
    }

    /// The request content, empty when the request carried none.
    pub fn content(&self) -> &'req [u8] {
        self.content
    }
}

/// Path parameters captured by a route pattern.
///
/// Route patterns and request paths are both lower-cased before matching, so a pattern
/// written as `/users/{userId}` captures under the key `userid` and every captured value
/// is lower case. [`get`](Self::get) compares keys ignoring ASCII case, which lets
/// handlers keep using the name as written in the pattern.
#[derive(Debug, Clone, Default)]
pub struct PathParams<'server, 'req> {
    pairs: Vec<(&'server str, &'req str)>,
}

impl<'server, 'req> PathParams<'server, 'req> {
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&'req str> {
        let key = key.as_ref();
        self.pairs.iter().find(|(name, _)| name.eq_ignore_ascii_case(key)).map(|&(_, value)| value)
    }

    /// Pairs in the order the segments appear in the pattern, keys lower case.
    pub fn iter(&self) -> impl Iterator<Item = (&'server str, &'req str)> + '_ {
        self.pairs.iter().copied()
    }
}

impl<'server, 'req> From<Params<'server, 'req>> for PathParams<'server, 'req> {
    fn from(params: Params<'server, 'req>) -> Self {
        Self { pairs: params.iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_named_segments() {
        let mut router = matchit::Router::new();
        router.insert("/users/{id}/posts/{post}", ()).unwrap();
        let matched = router.at("/users/7/posts/intro").unwrap();

        let params = PathParams::from(matched.params);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.iter().collect::<Vec<_>>(), [("id", "7"), ("post", "intro")]);

        let context = RouteContext::new(params, b"body");
        assert_eq!(context.param("post"), Some("intro"));
        assert_eq!(context.content(), b"body");
    }

    #[test]
    fn keys_follow_the_lower_cased_pattern() {
        let mut router = matchit::Router::new();
        router.insert("/users/{userid}", ()).unwrap();
        let matched = router.at("/users/ada").unwrap();

        let params = PathParams::from(matched.params);
        assert_eq!(params.get("userId"), Some("ada"));
        assert_eq!(params.get("USERID"), Some("ada"));
        assert_eq!(params.iter().collect::<Vec<_>>(), [("userid", "ada")]);
    }

    #[test]
    fn empty_params() {
        let params = PathParams::empty();
        assert!(params.is_empty());
        assert_eq!(params.iter().count(), 0);
    }
}
