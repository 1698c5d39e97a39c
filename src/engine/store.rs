use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::availability::order_and_page;
use super::eligibility::has_completed_rental;

pub type SharedItemState = Arc<RwLock<ItemState>>;

/// In-memory record store: the Identity Directory, the Item Catalog, and the
/// Booking Store. Bookings and comments live inside their item's state so a
/// write lock on the item serializes every read-modify-write on them.
pub struct BookingStore {
    users: DashMap<Ulid, User>,
    /// email → user id
    emails: DashMap<String, Ulid>,
    items: DashMap<Ulid, SharedItemState>,
    /// Reverse lookup: booking id → item id
    booking_to_item: DashMap<Ulid, Ulid>,
    /// Booker → booking ids, in creation order.
    by_booker: DashMap<Ulid, Vec<Ulid>>,
    /// Owner → item ids, in creation order.
    by_owner: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            items: DashMap::new(),
            booking_to_item: DashMap::new(),
            by_booker: DashMap::new(),
            by_owner: DashMap::new(),
        }
    }

    // ── Identity directory ───────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_name(&self, id: &Ulid) -> String {
        self.users
            .get(id)
            .map(|e| e.value().name.clone())
            .unwrap_or_default()
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn email_owner(&self, email: &str) -> Option<Ulid> {
        self.emails.get(email).map(|e| *e.value())
    }

    // ── Item catalog ─────────────────────────────────────────

    pub fn item(&self, id: &Ulid) -> Option<SharedItemState> {
        self.items.get(id).map(|e| e.value().clone())
    }

    pub fn items_of_owner(&self, owner_id: &Ulid) -> Vec<Ulid> {
        self.by_owner
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn item_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.items.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn item_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_item.get(booking_id).map(|e| *e.value())
    }

    // ── Booking queries ──────────────────────────────────────

    pub async fn find_by_id(&self, booking_id: &Ulid) -> Option<Booking> {
        let item_id = self.item_for_booking(booking_id)?;
        let st = self.item(&item_id)?;
        let guard = st.read().await;
        guard.booking(booking_id).cloned()
    }

    pub async fn find_by_item_order_by_start_asc(&self, item_id: &Ulid) -> Vec<Booking> {
        match self.item(item_id) {
            Some(st) => st.read().await.bookings.clone(),
            None => Vec::new(),
        }
    }

    pub async fn find_by_item_order_by_start_desc(&self, item_id: &Ulid) -> Vec<Booking> {
        let mut bookings = self.find_by_item_order_by_start_asc(item_id).await;
        // Stable: equal starts keep insertion order.
        bookings.sort_by(|a, b| b.span.start.cmp(&a.span.start));
        bookings
    }

    /// Bookings made by `booker_id`, filtered, ordered by start descending, paged.
    pub async fn find_by_booker(
        &self,
        booker_id: &Ulid,
        state: BookingState,
        now: Ms,
        page: Page,
    ) -> Vec<(Booking, Item)> {
        let booking_ids = self
            .by_booker
            .get(booker_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut per_item: BTreeMap<Ulid, Vec<Ulid>> = BTreeMap::new();
        for bid in booking_ids {
            if let Some(item_id) = self.item_for_booking(&bid) {
                per_item.entry(item_id).or_default().push(bid);
            }
        }

        let mut found = Vec::new();
        for (item_id, bids) in per_item {
            let Some(st) = self.item(&item_id) else { continue };
            let guard = st.read().await;
            for bid in bids {
                if let Some(b) = guard.booking(&bid) {
                    found.push((b.clone(), guard.item.clone()));
                }
            }
        }
        order_and_page(found, state, now, page)
    }

    /// Bookings on any item owned by `owner_id`, filtered, ordered by start descending, paged.
    pub async fn find_by_item_owner(
        &self,
        owner_id: &Ulid,
        state: BookingState,
        now: Ms,
        page: Page,
    ) -> Vec<(Booking, Item)> {
        let mut found = Vec::new();
        for item_id in self.items_of_owner(owner_id) {
            let Some(st) = self.item(&item_id) else { continue };
            let guard = st.read().await;
            for b in &guard.bookings {
                found.push((b.clone(), guard.item.clone()));
            }
        }
        order_and_page(found, state, now, page)
    }

    pub async fn exists_completed_rental(
        &self,
        user_id: &Ulid,
        item_id: &Ulid,
        before: Ms,
    ) -> bool {
        let Some(st) = self.item(item_id) else {
            return false;
        };
        let guard = st.read().await;
        has_completed_rental(&*guard, user_id, before)
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event that does not belong to an existing item's state.
    /// Item-scoped events are routed to [`BookingStore::apply_to_item`].
    pub fn apply_directory_event(&self, event: &Event) {
        match event {
            Event::UserCreated { id, name, email } => {
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        name: name.clone(),
                        email: email.clone(),
                    },
                );
                self.emails.insert(email.clone(), *id);
            }
            Event::UserUpdated { id, name, email } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    if user.email != *email {
                        self.emails.remove(&user.email);
                        self.emails.insert(email.clone(), *id);
                    }
                    user.name = name.clone();
                    user.email = email.clone();
                }
            }
            Event::ItemCreated {
                id,
                owner_id,
                name,
                description,
                available,
            } => {
                let item = Item {
                    id: *id,
                    owner_id: *owner_id,
                    name: name.clone(),
                    description: description.clone(),
                    available: *available,
                };
                self.items
                    .insert(*id, Arc::new(RwLock::new(ItemState::new(item))));
                self.by_owner.entry(*owner_id).or_default().push(*id);
            }
            Event::ItemUpdated { .. }
            | Event::BookingRequested { .. }
            | Event::BookingDecided { .. }
            | Event::CommentAdded { .. } => {}
        }
    }

    /// Apply an item-scoped event directly to an ItemState (caller holds the lock).
    pub fn apply_to_item(&self, st: &mut ItemState, event: &Event) {
        match event {
            Event::ItemUpdated {
                name,
                description,
                available,
                ..
            } => {
                st.item.name = name.clone();
                st.item.description = description.clone();
                st.item.available = *available;
            }
            Event::BookingRequested {
                id,
                item_id,
                booker_id,
                span,
            } => {
                st.insert_booking(Booking {
                    id: *id,
                    item_id: *item_id,
                    booker_id: *booker_id,
                    span: *span,
                    status: BookingStatus::Waiting,
                });
                self.booking_to_item.insert(*id, *item_id);
                self.by_booker.entry(*booker_id).or_default().push(*id);
            }
            Event::BookingDecided { id, approved, .. } => {
                if let Some(b) = st.booking_mut(id) {
                    b.status = if *approved {
                        BookingStatus::Approved
                    } else {
                        BookingStatus::Rejected
                    };
                }
            }
            Event::CommentAdded {
                id,
                item_id,
                author_id,
                text,
                created,
            } => {
                st.comments.push(Comment {
                    id: *id,
                    item_id: *item_id,
                    author_id: *author_id,
                    text: text.clone(),
                    created: *created,
                });
            }
            Event::UserCreated { .. }
            | Event::UserUpdated { .. }
            | Event::ItemCreated { .. } => {}
        }
    }
}

/// Item id an event is scoped to, for item-scoped events.
pub(super) fn event_item_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ItemUpdated { id, .. } => Some(*id),
        Event::BookingRequested { item_id, .. }
        | Event::BookingDecided { item_id, .. }
        | Event::CommentAdded { item_id, .. } => Some(*item_id),
        Event::UserCreated { .. }
        | Event::UserUpdated { .. }
        | Event::ItemCreated { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (BookingStore, Ulid, Ulid, Ulid) {
        let store = BookingStore::new();
        let owner = Ulid::new();
        let booker = Ulid::new();
        let item = Ulid::new();
        store.apply_directory_event(&Event::UserCreated {
            id: owner,
            name: "owner".into(),
            email: "owner@example.com".into(),
        });
        store.apply_directory_event(&Event::UserCreated {
            id: booker,
            name: "booker".into(),
            email: "booker@example.com".into(),
        });
        store.apply_directory_event(&Event::ItemCreated {
            id: item,
            owner_id: owner,
            name: "Drill".into(),
            description: "Cordless".into(),
            available: true,
        });
        (store, owner, booker, item)
    }

    async fn request(
        store: &BookingStore,
        item: Ulid,
        booker: Ulid,
        start: Ms,
        end: Ms,
    ) -> Ulid {
        let id = Ulid::new();
        let st = store.item(&item).unwrap();
        let mut guard = st.write().await;
        store.apply_to_item(
            &mut guard,
            &Event::BookingRequested {
                id,
                item_id: item,
                booker_id: booker,
                span: Span::new(start, end),
            },
        );
        id
    }

    #[tokio::test]
    async fn booking_indexes_follow_requests() {
        let (store, owner, booker, item) = seeded();
        let b1 = request(&store, item, booker, 300, 400).await;
        let b2 = request(&store, item, booker, 100, 200).await;

        assert_eq!(store.item_for_booking(&b1), Some(item));
        let found = store.find_by_id(&b2).await.unwrap();
        assert_eq!(found.span, Span::new(100, 200));

        let asc: Vec<_> = store
            .find_by_item_order_by_start_asc(&item)
            .await
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(asc, vec![b2, b1]);
        let desc: Vec<_> = store
            .find_by_item_order_by_start_desc(&item)
            .await
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(desc, vec![b1, b2]);

        let page = Page::new(0, 10).unwrap();
        let by_booker = store.find_by_booker(&booker, BookingState::All, 0, page).await;
        assert_eq!(by_booker.len(), 2);
        let by_owner = store.find_by_item_owner(&owner, BookingState::All, 0, page).await;
        assert_eq!(by_owner.len(), 2);
        assert!(
            store
                .find_by_booker(&owner, BookingState::All, 0, page)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn equal_starts_keep_request_order_both_ways() {
        let (store, _owner, booker, item) = seeded();
        request(&store, item, booker, 100, 200).await;
        let first = request(&store, item, booker, 500, 600).await;
        let second = request(&store, item, booker, 500, 700).await;

        let asc = store.find_by_item_order_by_start_asc(&item).await;
        assert_eq!(asc[1].id, first);
        assert_eq!(asc[2].id, second);
        let desc = store.find_by_item_order_by_start_desc(&item).await;
        assert_eq!(desc[0].id, first);
        assert_eq!(desc[1].id, second);
        assert!(store.find_by_item_order_by_start_desc(&Ulid::new()).await.is_empty());
    }

    #[tokio::test]
    async fn decision_updates_status_in_place() {
        let (store, _owner, booker, item) = seeded();
        let b = request(&store, item, booker, 100, 200).await;
        {
            let st = store.item(&item).unwrap();
            let mut guard = st.write().await;
            let decided = Event::BookingDecided {
                id: b,
                item_id: item,
                approved: false,
            };
            store.apply_to_item(&mut guard, &decided);
        }
        let found = store.find_by_id(&b).await.unwrap();
        assert_eq!(found.status, BookingStatus::Rejected);
    }

    #[tokio::test]
    async fn completed_rental_requires_approval_and_end() {
        let (store, _owner, booker, item) = seeded();
        let b = request(&store, item, booker, 100, 200).await;
        assert!(!store.exists_completed_rental(&booker, &item, 1_000).await);
        {
            let st = store.item(&item).unwrap();
            let mut guard = st.write().await;
            let decided = Event::BookingDecided {
                id: b,
                item_id: item,
                approved: true,
            };
            store.apply_to_item(&mut guard, &decided);
        }
        assert!(store.exists_completed_rental(&booker, &item, 1_000).await);
        assert!(!store.exists_completed_rental(&booker, &item, 200).await);
        assert!(!store.exists_completed_rental(&booker, &Ulid::new(), 1_000).await);
    }

    #[test]
    fn email_index_follows_updates() {
        let (store, owner, _booker, _item) = seeded();
        assert_eq!(store.email_owner("owner@example.com"), Some(owner));
        store.apply_directory_event(&Event::UserUpdated {
            id: owner,
            name: "renamed".into(),
            email: "new@example.com".into(),
        });
        assert_eq!(store.email_owner("owner@example.com"), None);
        assert_eq!(store.email_owner("new@example.com"), Some(owner));
        assert_eq!(store.user(&owner).unwrap().name, "renamed");
    }
}
