//! Listing
//!
//! Shared pagination for every kind's lister. Pagination is exhaustive by
//! default: pages are fetched lazily until the server stops returning a
//! token, or until an explicit limit is reached. `filter` and `order_by`
//! are passed verbatim to the server; the client never re-sorts.

use crate::error::Result;
use crate::gcp::client::PlatformClient;
use serde_json::Value;

/// Options accepted by every lister
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    /// Server-side filter expression, passed through unmodified
    pub filter: Option<String>,
    /// Server-side ordering, passed through unmodified
    pub order_by: Option<String>,
    /// Page size hint for the server
    pub page_size: Option<u32>,
    /// Client-side bound on the total number of items returned
    pub limit: Option<usize>,
}

/// Fetch all pages of `collection_path`, returning raw resource messages
///
/// `items_key` is the response field holding the page's items, which the
/// API names after the collection (e.g. `customJobs`).
pub(crate) async fn list_resources(
    client: &PlatformClient,
    collection_path: &str,
    items_key: &str,
    params: &ListParams,
) -> Result<Vec<Value>> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(filter) = &params.filter {
            query.push(("filter", filter.clone()));
        }
        if let Some(order_by) = &params.order_by {
            query.push(("orderBy", order_by.clone()));
        }
        if let Some(page_size) = params.page_size {
            query.push(("pageSize", page_size.to_string()));
        }
        if let Some(token) = &page_token {
            query.push(("pageToken", token.clone()));
        }

        let response = client.get(collection_path, &query, None).await?;

        if let Some(items) = response.get(items_key).and_then(|i| i.as_array()) {
            all_items.extend(items.iter().cloned());
        }

        if let Some(limit) = params.limit {
            if all_items.len() >= limit {
                all_items.truncate(limit);
                return Ok(all_items);
            }
        }

        page_token = response
            .get("nextPageToken")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string());
        if page_token.is_none() {
            return Ok(all_items);
        }
    }
}
