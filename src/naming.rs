//! Collision-resistant names for test resources
//!
//! Names are built as `{base}-{actor}-{context}-{suffix}`:
//! - `base`: short resource token ("httpbin", "gw", ...), at most 8 chars
//! - `actor`: who runs the tests, at most 8 chars
//! - `context`: compressed test name, at most 9 chars
//! - `suffix`: random lowercase hex, 3 chars by default
//!
//! The result stays well below Kubernetes name limits, still tells a human
//! which test and which user created the object, and does not collide
//! between parallel runs.

const BASE_LEN: usize = 8;
const ACTOR_LEN: usize = 8;
const CONTEXT_LEN: usize = 9;
const MAX_TAIL: usize = 32;

/// Characters dropped from the middle of the test context
const COMPRESSED_CHARS: &[char] = &['a', 'i', 'y', 'u'];

/// Longest name [`Namer::blame`] can produce for a given suffix length
#[must_use]
pub fn max_name_len(tail: usize) -> usize {
    BASE_LEN + ACTOR_LEN + CONTEXT_LEN + tail.clamp(1, MAX_TAIL) + 3
}

/// Name of the user running the tests
#[must_use]
pub fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Append a random suffix of `tail` characters
#[must_use]
pub fn randomize(name: &str, tail: usize) -> String {
    let tail = tail.clamp(1, MAX_TAIL);
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{name}-{}", &random[..tail])
}

/// Compress a test identity into a short context token
///
/// Takes the last path segment, drops the `test_` prefix, keeps the first
/// word and squeezes some vowels out of its middle.
#[must_use]
pub fn test_context(test_id: &str) -> String {
    let node = test_id.rsplit("::").next().unwrap_or(test_id);
    let node = node.strip_prefix("test_").unwrap_or(node);

    let lowered = node.to_lowercase();
    let word = lowered.split('_').next().unwrap_or_default();

    let chars: Vec<char> = word.chars().collect();
    let mut context: String = if chars.len() > 2 {
        let middle = chars[2..chars.len() - 1]
            .iter()
            .filter(|c| !COMPRESSED_CHARS.contains(c));
        chars[..2]
            .iter()
            .chain(middle)
            .chain(chars.last())
            .collect()
    } else {
        word.to_string()
    };

    if let Some((head, _)) = context.split_once('.') {
        context = head.to_string();
    }

    context
}

/// Keep lowercase ascii alphanumerics, turn everything else into `-`
fn sanitize(part: &str, max: usize) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(max)
        .collect()
}

/// Generates names scoped to one test and one actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namer {
    actor: String,
    context: String,
    tail: usize,
}

impl Namer {
    #[must_use]
    pub fn new(actor: &str, test_id: &str) -> Self {
        Self {
            actor: sanitize(actor, ACTOR_LEN),
            context: sanitize(&test_context(test_id), CONTEXT_LEN),
            tail: crate::config::DEFAULT_NAME_TAIL,
        }
    }

    /// Set the random suffix length (clamped to 1..=32)
    #[must_use]
    pub fn tail(mut self, tail: usize) -> Self {
        self.tail = tail.clamp(1, MAX_TAIL);
        self
    }

    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Name for an object scoped to this test, e.g. `httpbin-alice123-foo-3fa`
    #[must_use]
    pub fn blame(&self, base: &str) -> String {
        self.blame_with_tail(base, self.tail)
    }

    #[must_use]
    pub fn blame_with_tail(&self, base: &str, tail: usize) -> String {
        let prefix = format!(
            "{}-{}-{}",
            sanitize(base, BASE_LEN),
            self.actor,
            self.context
        );
        randomize(&prefix, tail)
    }

    /// Label shared by every resource of a test run
    #[must_use]
    pub fn label(&self) -> String {
        self.blame("testrun")
    }
}
