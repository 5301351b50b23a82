//! Short-TTL template lookup cache.
//!
//! Fronts `get_template_with_build_by_tag` so hot templates do not hammer the
//! database. Terminal build transitions invalidate every entry for the
//! template so tenants see the new build immediately.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::db::{Database, TemplateWithBuild};
use crate::error::Result;

const TEMPLATE_CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedTemplate {
    value: TemplateWithBuild,
    fetched_at: Instant,
}

pub struct TemplateCache {
    db: Arc<dyn Database>,
    entries: DashMap<String, CachedTemplate>,
}

impl TemplateCache {
    pub fn new(db: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self {
            db,
            entries: DashMap::new(),
        })
    }

    /// Resolve a template id or alias, serving from cache when fresh.
    pub async fn resolve(&self, tag: &str) -> Result<TemplateWithBuild> {
        if let Some(entry) = self.entries.get(tag)
            && entry.fetched_at.elapsed() < TEMPLATE_CACHE_TTL
        {
            return Ok(entry.value.clone());
        }

        let value = self.db.get_template_with_build_by_tag(tag).await?;
        self.entries.insert(
            tag.to_string(),
            CachedTemplate {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Drop every entry resolving to `template_id`, alias keys included.
    pub fn invalidate(&self, template_id: &str) {
        self.entries
            .retain(|_, cached| cached.value.template_id != template_id);
    }
}
