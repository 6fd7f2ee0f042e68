//! Slug derivation for demo names.
//!
//! Names typed by the agency are often bilingual, so non-ASCII Han characters
//! are transliterated with `pinyin` before `slug` normalises the text. The
//! uniqueness check is supplied by the caller so this module stays free of
//! persistence concerns.

use std::future::Future;

use pinyin::{Pinyin, ToPinyin};
use slug::slugify;
use thiserror::Error;

const MAX_SUFFIX_ATTEMPTS: usize = 32;
const MAX_SLUG_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
    #[error("exhausted attempts to find a unique slug for `{base}`")]
    Exhausted { base: String },
}

#[derive(Debug, Error)]
pub enum SlugAsyncError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Predicate(E),
}

/// Derive the base slug for a demo name, capped at 64 characters.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let transliterated = transliterate_to_ascii(input);
    let mut candidate = slugify(&transliterated);

    if candidate.len() > MAX_SLUG_LEN {
        candidate.truncate(MAX_SLUG_LEN);
        while candidate.ends_with('-') {
            candidate.pop();
        }
    }

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Produce a slug the predicate reports as free, suffixing `-2`, `-3`, … on
/// collisions.
pub async fn generate_unique_slug<F, Fut, E>(
    input: &str,
    mut is_unique: F,
) -> Result<String, SlugAsyncError<E>>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let base = derive_slug(input)?;

    if is_unique(&base).await.map_err(SlugAsyncError::Predicate)? {
        return Ok(base);
    }

    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let candidate = format!("{base}-{attempt}");
        if is_unique(&candidate)
            .await
            .map_err(SlugAsyncError::Predicate)?
        {
            return Ok(candidate);
        }
    }

    Err(SlugAsyncError::Slug(SlugError::Exhausted { base }))
}

fn transliterate_to_ascii(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for ch in input.chars() {
        if ch.is_ascii() {
            output.push(ch);
            continue;
        }

        match ch.to_pinyin() {
            Some(py) => append_pinyin(&mut output, py),
            None if ch.is_whitespace() => output.push(' '),
            None => output.push(ch),
        }
    }

    output
}

fn append_pinyin(buffer: &mut String, pinyin: Pinyin) {
    if !buffer.is_empty() && !buffer.ends_with(' ') {
        buffer.push(' ');
    }
    buffer.push_str(pinyin.plain());
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    #[test]
    fn derive_slug_normalises_demo_names() {
        assert_eq!(
            derive_slug("Acme Bakery: Spring Launch").expect("slug"),
            "acme-bakery-spring-launch"
        );
        assert_eq!(derive_slug("官网 Demo").expect("slug"), "guan-wang-demo");
    }

    #[test]
    fn derive_slug_rejects_blank_names() {
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
    }

    #[test]
    fn derive_slug_caps_length_without_trailing_dash() {
        let name = "word ".repeat(40);
        let slug = derive_slug(&name).expect("slug");
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[tokio::test]
    async fn generate_unique_slug_appends_counter() {
        let existing = Arc::new(Mutex::new(vec!["client-preview".to_string()]));

        let slug = generate_unique_slug("Client Preview", |candidate| {
            let existing = existing.clone();
            let candidate = candidate.to_string();
            async move {
                let guard = existing.lock().await;
                Ok::<bool, Infallible>(!guard.contains(&candidate))
            }
        })
        .await
        .expect("unique slug");

        assert_eq!(slug, "client-preview-2");
    }

    #[tokio::test]
    async fn generate_unique_slug_gives_up_eventually() {
        let result = generate_unique_slug("Taken", |_| async { Ok::<bool, Infallible>(false) })
            .await
            .expect_err("should exhaust attempts");

        assert!(matches!(
            result,
            SlugAsyncError::Slug(SlugError::Exhausted { .. })
        ));
    }
}
