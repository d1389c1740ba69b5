// ABOUTME: Process-wide cache of compiled CSS selectors shared by the DOM-based extractors.
// ABOUTME: Selectors are parsed once and handed out behind Arc.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use scraper::Selector;

/// Invalid selectors are cached as `None` so they are not re-parsed.
static SELECTOR_CACHE: Lazy<RwLock<HashMap<String, Option<Arc<Selector>>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Get or compile a CSS selector. Returns `None` for invalid selectors.
pub fn selector(css: &str) -> Option<Arc<Selector>> {
    if let Ok(cache) = SELECTOR_CACHE.read() {
        if let Some(cached) = cache.get(css) {
            return cached.clone();
        }
    }

    let compiled = Selector::parse(css).ok().map(Arc::new);
    if let Ok(mut cache) = SELECTOR_CACHE.write() {
        // Another thread may have inserted meanwhile.
        return cache
            .entry(css.to_string())
            .or_insert(compiled)
            .clone();
    }
    compiled
}
