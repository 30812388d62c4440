//! Business listing discovery through a cascade of search strategies.

use super::batch::{UnitProcessor, UnitRequest};
use crate::client::{SearchHit, SearchProvider};
use crate::enrich::canonical_key;
use crate::models::{InputConfig, Result, SubItem};
use std::sync::Arc;
use tracing::debug;

/// Restricts results to the listing site.
const SITE_FILTER: &str = "site:yelp.com";

/// Path segment that marks a business page.
const LISTING_PATH: &str = "/biz/";

/// One query to try, most specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStrategy {
    pub name: &'static str,
    pub query: String,
}

/// Input columns the cascade reads.
#[derive(Debug, Clone)]
pub struct ListingColumns {
    pub city: String,
    pub state: String,
    pub address: String,
    pub project: String,
}

impl From<&InputConfig> for ListingColumns {
    fn from(config: &InputConfig) -> Self {
        Self {
            city: config.city_column.clone(),
            state: config.state_column.clone(),
            address: config.address_column.clone(),
            project: config.project_column.clone(),
        }
    }
}

/// Street part of an address with house numbers removed.
pub fn street_name(address: &str) -> String {
    address
        .split_whitespace()
        .filter(|word| !word.starts_with(|c: char| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Name before the first dash of any kind.
fn base_name(name: &str) -> &str {
    name.split(['–', '—', '-']).next().unwrap_or(name).trim()
}

/// Ordered strategies for one business.
pub fn build_strategies(name: &str, city: &str, state: &str, address: &str, project: &str) -> Vec<SearchStrategy> {
    let locality = [city, state]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let query = |parts: &[&str]| {
        parts
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut strategies = Vec::new();

    let street = street_name(address);
    if !street.is_empty() {
        strategies.push(SearchStrategy {
            name: "name_street_city_state",
            query: query(&[name, street.as_str(), locality.as_str()]),
        });
    }

    strategies.push(SearchStrategy {
        name: "name_city_state",
        query: query(&[name, locality.as_str()]),
    });

    let project = project.trim();
    if !project.is_empty() && project != name {
        strategies.push(SearchStrategy {
            name: "project_name",
            query: query(&[project, locality.as_str()]),
        });
    }

    let base = base_name(name);
    if !base.is_empty() && base != name.trim() {
        strategies.push(SearchStrategy {
            name: "base_name",
            query: query(&[base, locality.as_str()]),
        });
    }

    strategies
}

/// First listing page among the hits, query string removed.
pub fn first_listing_url(hits: &[SearchHit]) -> Option<String> {
    hits.iter()
        .filter(|hit| hit.url.contains("yelp.com") && hit.url.contains(LISTING_PATH))
        .map(|hit| hit.url.split('?').next().unwrap_or_default().to_string())
        .next()
}

/// Display name from a listing slug: `franklin-barbecue-austin` →
/// `Franklin Barbecue Austin`.
pub fn listing_name(url: &str) -> String {
    let slug = url
        .rsplit_once(LISTING_PATH)
        .map(|(_, slug)| slug.trim_end_matches('/'))
        .unwrap_or_default();
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unit processor for the listings pipeline.
pub struct ListingLookup<S> {
    search: Arc<S>,
    columns: ListingColumns,
    max_results: usize,
}

impl<S: SearchProvider> ListingLookup<S> {
    pub fn new(search: Arc<S>, columns: ListingColumns, max_results: usize) -> Self {
        Self {
            search,
            columns,
            max_results,
        }
    }
}

impl<S: SearchProvider> UnitProcessor for ListingLookup<S> {
    async fn process(&self, unit: UnitRequest) -> Result<Vec<SubItem>> {
        let strategies = build_strategies(
            &unit.name,
            unit.field(&self.columns.city),
            unit.field(&self.columns.state),
            unit.field(&self.columns.address),
            unit.field(&self.columns.project),
        );

        for strategy in strategies {
            let hits = self
                .search
                .search(&format!("{} {SITE_FILTER}", strategy.query), self.max_results)
                .await?;
            let Some(url) = first_listing_url(&hits) else {
                debug!(business = %unit.name, strategy = strategy.name, "No listing found");
                continue;
            };

            let item = SubItem::new(listing_name(&url))
                .with_lookup_key(canonical_key(&url))
                .with_source(url, "")
                .with_attribute("search_strategy", strategy.name)
                .with_attribute("search_query", strategy.query);
            return Ok(vec![item]);
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichmentStatus;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[test]
    fn test_street_name_drops_house_numbers() {
        assert_eq!(street_name("501 Brazos Street"), "Brazos Street");
        assert_eq!(street_name("1100 S Lamar Blvd Ste 2120"), "S Lamar Blvd Ste");
        assert_eq!(street_name(""), "");
    }

    #[test]
    fn test_full_cascade_order() {
        let strategies = build_strategies(
            "Taco Joint - Downtown",
            "Austin",
            "TX",
            "501 Brazos Street",
            "Taco Joint",
        );
        let names: Vec<&str> = strategies.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["name_street_city_state", "name_city_state", "project_name", "base_name"]
        );
        assert_eq!(strategies[0].query, "Taco Joint - Downtown Brazos Street Austin TX");
        assert_eq!(strategies[3].query, "Taco Joint Austin TX");
    }

    #[test]
    fn test_minimal_cascade() {
        let strategies = build_strategies("Franklin Barbecue", "Austin", "TX", "", "Franklin Barbecue");
        assert_eq!(
            strategies,
            vec![SearchStrategy {
                name: "name_city_state",
                query: "Franklin Barbecue Austin TX".to_string(),
            }]
        );
    }

    #[test]
    fn test_listing_url_and_name() {
        let hits = vec![
            SearchHit {
                url: "https://www.yelp.com/search?find_desc=bbq".to_string(),
                ..Default::default()
            },
            SearchHit {
                url: "https://www.yelp.com/biz/franklin-barbecue-austin?osq=bbq".to_string(),
                ..Default::default()
            },
        ];
        let url = first_listing_url(&hits).unwrap();
        assert_eq!(url, "https://www.yelp.com/biz/franklin-barbecue-austin");
        assert_eq!(listing_name(&url), "Franklin Barbecue Austin");
    }

    struct ScriptedSearch {
        answer_on: &'static str,
        queries: Mutex<Vec<String>>,
    }

    impl SearchProvider for ScriptedSearch {
        async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
            self.queries.lock().unwrap().push(query.to_string());
            if query.contains(self.answer_on) {
                return Ok(vec![SearchHit {
                    url: "https://www.yelp.com/biz/taco-joint-austin-2".to_string(),
                    ..Default::default()
                }]);
            }
            Ok(vec![])
        }
    }

    fn request() -> UnitRequest {
        let fields: BTreeMap<String, String> = [
            ("City", "Austin"),
            ("State", "TX"),
            ("Address", "501 Brazos Street"),
            ("Project Name (from Locations)", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        UnitRequest {
            index: 3,
            name: "Taco Joint - Downtown".to_string(),
            fields,
        }
    }

    fn columns() -> ListingColumns {
        ListingColumns {
            city: "City".into(),
            state: "State".into(),
            address: "Address".into(),
            project: "Project Name (from Locations)".into(),
        }
    }

    #[tokio::test]
    async fn test_cascade_falls_through_to_base_name() {
        let search = Arc::new(ScriptedSearch {
            answer_on: "Taco Joint Austin TX site:yelp.com",
            queries: Mutex::new(vec![]),
        });
        let lookup = ListingLookup::new(Arc::clone(&search), columns(), 5);

        let items = lookup.process(request()).await.unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.name, "Taco Joint Austin 2");
        assert_eq!(item.lookup_key, "yelp.com/biz/taco-joint-austin-2");
        assert_eq!(item.status, EnrichmentStatus::Pending);
        assert_eq!(item.attributes["search_strategy"], "base_name");
        assert_eq!(search.queries.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_no_listing_gives_empty_payload() {
        let search = Arc::new(ScriptedSearch {
            answer_on: "never matches",
            queries: Mutex::new(vec![]),
        });
        let lookup = ListingLookup::new(search, columns(), 5);
        assert!(lookup.process(request()).await.unwrap().is_empty());
    }
}
