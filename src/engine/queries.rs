use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::mutations::booking_view;
use super::rules::check_visible;
use super::{Engine, EngineError};

impl Engine {
    // ── Collaborator resolution ──────────────────────────────

    pub fn resolve_user(&self, id: &Ulid) -> Result<User, EngineError> {
        self.store
            .user(id)
            .ok_or_else(|| EngineError::NotFound(format!("user {id}")))
    }

    pub async fn resolve_item(&self, id: &Ulid) -> Result<Item, EngineError> {
        let st = self
            .store
            .item(id)
            .ok_or_else(|| EngineError::NotFound(format!("item {id}")))?;
        let guard = st.read().await;
        Ok(guard.item.clone())
    }

    pub fn list_users(&self) -> Vec<User> {
        self.store.users()
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Visible only to the booker and the item's owner.
    pub async fn get_booking(
        &self,
        booking_id: Ulid,
        caller: Ulid,
    ) -> Result<BookingView, EngineError> {
        let not_found = || EngineError::NotFound(format!("booking {booking_id}"));
        let booking = self
            .store
            .find_by_id(&booking_id)
            .await
            .ok_or_else(not_found)?;
        let item = self
            .resolve_item(&booking.item_id)
            .await
            .map_err(|_| not_found())?;
        check_visible(&booking, &item, &caller)?;
        Ok(booking_view(
            &booking,
            &item,
            self.store.user_name(&booking.booker_id),
        ))
    }

    /// Bookings the user made, newest start first.
    pub async fn list_by_booker(
        &self,
        user_id: Ulid,
        state: &str,
        from: i64,
        size: i64,
    ) -> Result<Vec<BookingView>, EngineError> {
        self.resolve_user(&user_id)?;
        let page = Page::new(from, size)?;
        let state: BookingState = state.parse()?;
        let rows = self
            .store
            .find_by_booker(&user_id, state, self.now(), page)
            .await;
        Ok(self.views(rows))
    }

    /// Bookings on the user's items, newest start first.
    pub async fn list_by_owner(
        &self,
        user_id: Ulid,
        state: &str,
        from: i64,
        size: i64,
    ) -> Result<Vec<BookingView>, EngineError> {
        self.resolve_user(&user_id)?;
        let page = Page::new(from, size)?;
        let state: BookingState = state.parse()?;
        let rows = self
            .store
            .find_by_item_owner(&user_id, state, self.now(), page)
            .await;
        Ok(self.views(rows))
    }

    fn views(&self, rows: Vec<(Booking, Item)>) -> Vec<BookingView> {
        rows.iter()
            .map(|(b, item)| booking_view(b, item, self.store.user_name(&b.booker_id)))
            .collect()
    }

    // ── Items ────────────────────────────────────────────────

    /// Last/next booking pair shown to an item's owner.
    ///
    /// Ordering-based, not relative to now: `last_booking` is the earliest-starting
    /// booking and `next_booking` the latest-starting one. `next_booking` is only
    /// looked up when `last_booking` exists.
    pub async fn item_snapshot(&self, item_id: Ulid) -> Result<AvailabilitySnapshot, EngineError> {
        self.resolve_item(&item_id).await?;
        let ascending = self.store.find_by_item_order_by_start_asc(&item_id).await;
        let Some(last) = ascending.first() else {
            return Ok(AvailabilitySnapshot::default());
        };
        let descending = self.store.find_by_item_order_by_start_desc(&item_id).await;
        Ok(AvailabilitySnapshot {
            last_booking: Some(BookingShort::from(last)),
            next_booking: descending.first().map(BookingShort::from),
        })
    }

    /// Item with its comments; the last/next booking snapshot is attached only for the owner.
    pub async fn get_item(&self, item_id: Ulid, caller: Ulid) -> Result<ItemView, EngineError> {
        let item = self.resolve_item(&item_id).await?;
        let for_owner = item.owner_id == caller;
        self.item_view(item, for_owner).await
    }

    pub async fn list_owner_items(
        &self,
        owner_id: Ulid,
        from: i64,
        size: i64,
    ) -> Result<Vec<ItemView>, EngineError> {
        self.resolve_user(&owner_id)?;
        let page = Page::new(from, size)?;
        let item_ids = self
            .store
            .items_of_owner(&owner_id)
            .into_iter()
            .skip(page.offset())
            .take(page.size);
        let mut views = Vec::new();
        for item_id in item_ids {
            let item = self.resolve_item(&item_id).await?;
            views.push(self.item_view(item, true).await?);
        }
        Ok(views)
    }

    /// Available items whose name or description contains `text`, ignoring case.
    pub async fn search_items(
        &self,
        text: &str,
        from: i64,
        size: i64,
    ) -> Result<Vec<Item>, EngineError> {
        let page = Page::new(from, size)?;
        if text.len() > MAX_SEARCH_LEN {
            return Err(EngineError::LimitExceeded("search text too long"));
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let needle = text.to_lowercase();
        let mut hits = Vec::new();
        for item_id in self.store.item_ids() {
            let Some(st) = self.store.item(&item_id) else { continue };
            let guard = st.read().await;
            let item = &guard.item;
            if item.available
                && (item.name.to_lowercase().contains(&needle)
                    || item.description.to_lowercase().contains(&needle))
            {
                hits.push(item.clone());
            }
        }
        Ok(hits.into_iter().skip(page.offset()).take(page.size).collect())
    }

    // ── Comments ─────────────────────────────────────────────

    pub async fn list_comments(&self, item_id: Ulid) -> Result<Vec<CommentInfo>, EngineError> {
        let st = self
            .store
            .item(&item_id)
            .ok_or_else(|| EngineError::NotFound(format!("item {item_id}")))?;
        let guard = st.read().await;
        Ok(guard
            .comments
            .iter()
            .map(|c| CommentInfo {
                id: c.id,
                item_id: c.item_id,
                text: c.text.clone(),
                author_name: self.store.user_name(&c.author_id),
                created: c.created,
            })
            .collect())
    }

    /// Eligibility only ever flips from false to true: approvals are terminal
    /// and `now` moves forward.
    pub async fn can_comment(&self, user_id: Ulid, item_id: Ulid) -> bool {
        self.store
            .exists_completed_rental(&user_id, &item_id, self.now())
            .await
    }

    async fn item_view(&self, item: Item, for_owner: bool) -> Result<ItemView, EngineError> {
        let snapshot = if for_owner {
            Some(self.item_snapshot(item.id).await?)
        } else {
            None
        };
        let comments = self.list_comments(item.id).await?;
        Ok(ItemView {
            item,
            snapshot,
            comments,
        })
    }
}
