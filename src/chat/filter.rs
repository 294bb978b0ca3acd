// Prohibited-word content filter.
//
// Words come from the cache key `chat:prohibited_words` (a JSON array). Each
// configured word is replaced by asterisks of equal length; matching is
// case-sensitive and exact.

use std::sync::Arc;

use crate::cache::CacheManager;

pub const PROHIBITED_WORDS_KEY: &str = "chat:prohibited_words";

pub struct ContentFilter {
    cache: Arc<CacheManager>,
}

impl ContentFilter {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self { cache }
    }

    pub async fn filter(&self, content: &str) -> String {
        let words: Vec<String> = match self.cache.get_json(PROHIBITED_WORDS_KEY).await {
            Ok(Some(words)) => words,
            _ => return content.to_string(),
        };
        let mut filtered = content.to_string();
        for word in words {
            if word.is_empty() {
                continue;
            }
            let replacement = "*".repeat(word.chars().count());
            filtered = filtered.replace(&word, &replacement);
        }
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;

    async fn filter_with_words(words: &[&str]) -> ContentFilter {
        let cache = Arc::new(CacheManager::new());
        cache.register_backend("memory", Arc::new(MemoryCacheBackend::new()));
        cache
            .set_json(PROHIBITED_WORDS_KEY, &words.to_vec(), None)
            .await
            .unwrap();
        ContentFilter::new(cache)
    }

    #[tokio::test]
    async fn test_replaces_with_equal_length_asterisks() {
        let filter = filter_with_words(&["darn"]).await;
        assert_eq!(filter.filter("well darn it").await, "well **** it");
    }

    #[tokio::test]
    async fn test_case_sensitive_exact_match() {
        let filter = filter_with_words(&["darn"]).await;
        assert_eq!(filter.filter("DARN it").await, "DARN it");
    }

    #[tokio::test]
    async fn test_no_configured_words_passes_through() {
        let cache = Arc::new(CacheManager::new());
        cache.register_backend("memory", Arc::new(MemoryCacheBackend::new()));
        let filter = ContentFilter::new(cache);
        assert_eq!(filter.filter("anything goes").await, "anything goes");
    }
}
