//! Lazy pagination over a relationship listing.
//!
//! [`related_pages`] yields pages on demand; [`drain_related`] reads every
//! page into one [`RelationSet`] and only returns once the listing is
//! complete. A failure after the first page is reported as
//! [`DirectoryError::PartialPage`] and the pages already read are dropped.

use futures::stream::{self, Stream, StreamExt};
use tether_core::{Owner, RelationSet};
use tracing::debug;

use crate::client::{PageCursor, RelatedPage, RemoteDirectoryClient};
use crate::error::{DirectoryError, Result};

enum Position {
    Start,
    Next(PageCursor),
    Done,
}

/// Stream the owner's related entities page by page.
///
/// Nothing is fetched until the stream is polled. The stream ends after
/// the page whose `next` cursor is `None`, or after the first error.
pub fn related_pages<'a>(
    client: &'a dyn RemoteDirectoryClient,
    owner: &'a Owner,
) -> impl Stream<Item = Result<RelatedPage>> + Send + 'a {
    stream::try_unfold(Position::Start, move |position| async move {
        let cursor = match position {
            Position::Done => return Ok::<_, DirectoryError>(None),
            Position::Start => None,
            Position::Next(cursor) => Some(cursor),
        };
        let page = client.list_page(owner, cursor.as_ref()).await?;
        let next = page.next.clone().map_or(Position::Done, Position::Next);
        Ok(Some((page, next)))
    })
}

/// Read the complete set of related entities for `owner`.
///
/// # Errors
///
/// Returns the directory's error unchanged if the first page fails, or a
/// [`DirectoryError::PartialPage`] wrapping it if a later page fails.
pub async fn drain_related(client: &dyn RemoteDirectoryClient, owner: &Owner) -> Result<RelationSet> {
    let mut pages = std::pin::pin!(related_pages(client, owner));
    let mut observed = RelationSet::new();
    let mut pages_read = 0usize;

    while let Some(page) = pages.next().await {
        match page {
            Ok(page) => {
                pages_read = pages_read.saturating_add(1);
                observed.extend(page.records.into_iter().map(|record| record.id));
            }
            Err(err) if pages_read == 0 => return Err(err),
            Err(err) => return Err(DirectoryError::partial_page(pages_read, err)),
        }
    }

    debug!(owner = %owner, pages = pages_read, related = observed.len(), "Drained listing");
    Ok(observed)
}
