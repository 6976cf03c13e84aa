use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ParseError;

pub const DEFAULT_NAMESPACE: &str = "library";
pub const DEFAULT_TAG: &str = "latest";

static PATH_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("valid regex"));
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").expect("valid regex"));

/// An image reference of the form `[namespace/]image[:tag]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub namespace: String,
    pub image: String,
    pub tag: String,
}

impl ImageReference {
    /// `namespace/image`, as used in registry URLs and token scopes.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.namespace, self.image)
    }

    pub fn is_library(&self) -> bool {
        self.namespace == DEFAULT_NAMESPACE
    }
}

impl FromStr for ImageReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (namespace, rest) = match s.split_once('/') {
            Some((namespace, rest)) => (namespace, rest),
            None => (DEFAULT_NAMESPACE, s),
        };

        let (image, tag) = match rest.rsplit_once(':') {
            Some((image, tag)) => (image, tag),
            None => (rest, DEFAULT_TAG),
        };

        let invalid = |component: &'static str, value: &str| ParseError::InvalidComponent {
            reference: s.to_string(),
            component,
            value: value.to_string(),
        };

        if !PATH_COMPONENT.is_match(namespace) {
            return Err(invalid("namespace", namespace));
        }
        // nested repositories (`org/team/image`) keep every segment in the image name
        if image.split('/').any(|segment| !PATH_COMPONENT.is_match(segment)) {
            return Err(invalid("image name", image));
        }
        if !TAG.is_match(tag) {
            return Err(invalid("tag", tag));
        }

        Ok(ImageReference {
            namespace: namespace.to_string(),
            image: image.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.image, self.tag)
    }
}
