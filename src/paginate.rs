use futures::stream::BoxStream;
use serde_json::Value;

use crate::client::{ApiRequest, GraphClient, GraphResponse, QueryParams};
use crate::error::GraphResult;

pub const NEXT_LINK: &str = "@odata.nextLink";

impl GraphClient {
    /// Lazily walk a collection that pages with `@odata.nextLink`.
    ///
    /// Nothing is fetched until the stream is polled. Each continuation link
    /// is self-contained, so `path` and `params` only shape the first request.
    /// The stream ends when a page has no link, a page is empty, or `limit`
    /// items have been yielded, whichever comes first.
    pub fn paginate<'a>(
        &'a self,
        path: &'a str,
        account_id: Option<&'a str>,
        params: Option<QueryParams>,
        limit: Option<usize>,
    ) -> BoxStream<'a, GraphResult<Value>> {
        let stream = async_stream::try_stream! {
            let mut returned = 0usize;
            let mut first = ApiRequest::get(path);
            first.params = params;
            let mut next = Some(first);

            'pages: while let Some(request) = next.take() {
                if limit.is_some_and(|limit| returned >= limit) {
                    break;
                }

                let mut page = match self.execute(request, account_id).await? {
                    GraphResponse::Content(page) => page,
                    GraphResponse::NoContent => break,
                };

                let next_link = page
                    .get(NEXT_LINK)
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let items = match page.get_mut("value").map(Value::take) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };

                for item in items {
                    yield item;
                    returned += 1;
                    if limit.is_some_and(|limit| returned >= limit) {
                        break 'pages;
                    }
                }

                next = next_link.map(ApiRequest::get);
            }
        };

        Box::pin(stream)
    }
}
