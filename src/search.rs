//! Offset-paged search through `POST /search/query`.
//!
//! Hits are flattened in nesting order: response, then hits container,
//! then hit. After each cycle the offset advances by the page size while
//! any container reports `moreResultsAvailable`.
//!
//! A cycle whose response carries `@odata.nextLink` ends the search. That
//! is the opposite of what a continuation link usually means; it is kept
//! as the established behaviour until the intent is confirmed.

use futures::stream::BoxStream;
use serde_json::Value;
use tracing::debug;

use crate::client::{ApiRequest, GraphClient, GraphResponse};
use crate::error::{GraphError, GraphResult};
use crate::rest_types::{SearchPayload, SearchQueryString, SearchRequest, SearchResponsePage};

pub const SEARCH_ROUTE: &str = "/search/query";
pub const DEFAULT_SEARCH_LIMIT: usize = 50;
pub const MAX_SEARCH_PAGE_SIZE: usize = 25;

impl GraphClient {
    /// Lazily yield the `resource` of each search hit, at most `limit` of them.
    pub fn search<'a>(
        &'a self,
        query: &str,
        entity_types: Vec<String>,
        account_id: Option<&'a str>,
        limit: usize,
        fields: Option<Vec<String>>,
    ) -> BoxStream<'a, GraphResult<Value>> {
        let mut request = SearchRequest {
            entity_types,
            query: SearchQueryString {
                query_string: query.to_string(),
            },
            size: limit.min(MAX_SEARCH_PAGE_SIZE),
            from: 0,
            fields,
        };

        let stream = async_stream::try_stream! {
            let mut returned = 0usize;

            'cycles: while returned < limit {
                let payload = serde_json::to_value(SearchPayload { requests: [&request] })
                    .map_err(GraphError::from)?;

                debug!(from = request.from, size = request.size, "search cycle");
                let page = match self
                    .execute(ApiRequest::post_json(SEARCH_ROUTE, payload), account_id)
                    .await?
                {
                    GraphResponse::Content(page) => page,
                    GraphResponse::NoContent => break,
                };
                let page: SearchResponsePage =
                    serde_json::from_value(page).map_err(GraphError::from)?;
                let Some(responses) = page.value else {
                    break;
                };

                let more_available = responses
                    .iter()
                    .flat_map(|response| &response.hits_containers)
                    .any(|container| container.more_results_available);

                for response in responses {
                    for container in response.hits_containers {
                        for hit in container.hits {
                            yield hit.resource;
                            returned += 1;
                            if returned >= limit {
                                break 'cycles;
                            }
                        }
                    }
                }

                if page.next_link.is_some() || !more_available {
                    break;
                }
                request.from += request.size;
            }
        };

        Box::pin(stream)
    }
}
