use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::rules::{check_bookable, check_decidable, validate_email, validate_span, validate_text};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Identity directory ───────────────────────────────────

    pub async fn create_user(&self, name: String, email: String) -> Result<User, EngineError> {
        validate_text("name", &name, MAX_NAME_LEN, "user name too long")?;
        validate_email(&email)?;

        let _dir = self.directory_lock.lock().await;
        if self.store.user_count() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.store.email_owner(&email).is_some() {
            return Err(EngineError::Conflict(format!(
                "email {email} already registered"
            )));
        }

        let id = Ulid::new();
        let event = Event::UserCreated {
            id,
            name: name.clone(),
            email: email.clone(),
        };
        self.persist_directory(&event).await?;
        info!("user {id} registered");
        Ok(User { id, name, email })
    }

    /// Fields left as `None` keep their current value.
    pub async fn update_user(
        &self,
        id: Ulid,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<User, EngineError> {
        if let Some(ref n) = name {
            validate_text("name", n, MAX_NAME_LEN, "user name too long")?;
        }
        if let Some(ref e) = email {
            validate_email(e)?;
        }

        let _dir = self.directory_lock.lock().await;
        let current = self
            .store
            .user(&id)
            .ok_or_else(|| EngineError::NotFound(format!("user {id}")))?;
        if let Some(ref e) = email
            && let Some(holder) = self.store.email_owner(e)
            && holder != id
        {
            return Err(EngineError::Conflict(format!(
                "email {e} already registered"
            )));
        }

        let name = name.unwrap_or(current.name);
        let email = email.unwrap_or(current.email);
        let event = Event::UserUpdated {
            id,
            name: name.clone(),
            email: email.clone(),
        };
        self.persist_directory(&event).await?;
        Ok(User { id, name, email })
    }

    // ── Item catalog ─────────────────────────────────────────

    pub async fn create_item(
        &self,
        owner_id: Ulid,
        name: String,
        description: String,
        available: bool,
    ) -> Result<Item, EngineError> {
        self.resolve_user(&owner_id)?;
        validate_text("name", &name, MAX_NAME_LEN, "item name too long")?;
        validate_text(
            "description",
            &description,
            MAX_DESCRIPTION_LEN,
            "item description too long",
        )?;

        let _dir = self.directory_lock.lock().await;
        let id = Ulid::new();
        let event = Event::ItemCreated {
            id,
            owner_id,
            name: name.clone(),
            description: description.clone(),
            available,
        };
        self.persist_directory(&event).await?;
        info!("item {id} listed by {owner_id}");
        Ok(Item {
            id,
            owner_id,
            name,
            description,
            available,
        })
    }

    /// Only the owner may update an item; anyone else is told it doesn't exist.
    pub async fn update_item(
        &self,
        id: Ulid,
        caller: Ulid,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    ) -> Result<Item, EngineError> {
        if let Some(ref n) = name {
            validate_text("name", n, MAX_NAME_LEN, "item name too long")?;
        }
        if let Some(ref d) = description {
            validate_text(
                "description",
                d,
                MAX_DESCRIPTION_LEN,
                "item description too long",
            )?;
        }
        let st = self
            .store
            .item(&id)
            .ok_or_else(|| EngineError::NotFound(format!("item {id}")))?;
        let mut guard = st.write().await;
        if guard.item.owner_id != caller {
            return Err(EngineError::NotFound(format!(
                "item {id} for user {caller}"
            )));
        }

        let event = Event::ItemUpdated {
            id,
            name: name.unwrap_or_else(|| guard.item.name.clone()),
            description: description.unwrap_or_else(|| guard.item.description.clone()),
            available: available.unwrap_or(guard.item.available),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.item.clone())
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Request a booking. The new booking starts out `WAITING`.
    pub async fn create_booking(
        &self,
        requester: Ulid,
        item_id: Ulid,
        span: Span,
    ) -> Result<BookingView, EngineError> {
        let booker = self.resolve_user(&requester)?;
        let st = self
            .store
            .item(&item_id)
            .ok_or_else(|| EngineError::NotFound(format!("item {item_id}")))?;
        let mut guard = st.write().await;

        let checked = check_bookable(&guard.item, &requester)
            .and_then(|()| validate_span(&span, self.now()));
        if let Err(e) = checked {
            debug!("booking request by {requester} on {item_id} refused: {e}");
            return Err(e);
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many bookings on item"));
        }

        let id = Ulid::new();
        let event = Event::BookingRequested {
            id,
            item_id,
            booker_id: requester,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {id} requested on item {item_id} by {requester}");

        let booking = Booking {
            id,
            item_id,
            booker_id: requester,
            span,
            status: BookingStatus::Waiting,
        };
        Ok(booking_view(&booking, &guard.item, booker.name))
    }

    /// Approve or reject a `WAITING` booking. Terminal: a second decision fails.
    pub async fn decide_booking(
        &self,
        booking_id: Ulid,
        decider: Ulid,
        approved: bool,
    ) -> Result<BookingView, EngineError> {
        // The write lock spans the status check, the WAL append and the apply,
        // so concurrent decisions on one booking serialize.
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        if let Err(e) = check_decidable(&booking, &guard.item, &decider) {
            debug!("decision by {decider} on booking {booking_id} refused: {e}");
            return Err(e);
        }

        let event = Event::BookingDecided {
            id: booking_id,
            item_id: booking.item_id,
            approved,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let outcome = if approved { "approved" } else { "rejected" };
        metrics::counter!(
            crate::observability::BOOKINGS_DECIDED_TOTAL,
            "outcome" => outcome
        )
        .increment(1);
        info!("booking {booking_id} {outcome} by {decider}");

        let decided = guard
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        let booker_name = self.store.user_name(&decided.booker_id);
        Ok(booking_view(&decided, &guard.item, booker_name))
    }

    // ── Comments ─────────────────────────────────────────────

    /// Only renters whose approved rental of the item has ended may comment.
    pub async fn add_comment(
        &self,
        item_id: Ulid,
        author: Ulid,
        text: String,
    ) -> Result<CommentInfo, EngineError> {
        let user = self.resolve_user(&author)?;
        self.resolve_item(&item_id).await?;
        validate_text("text", &text, MAX_COMMENT_LEN, "comment too long")?;
        if !self.can_comment(author, item_id).await {
            return Err(EngineError::InvalidRequest(
                "item was not rented by this user, or rental not yet complete".into(),
            ));
        }

        let st = self
            .store
            .item(&item_id)
            .ok_or_else(|| EngineError::NotFound(format!("item {item_id}")))?;
        let mut guard = st.write().await;
        let id = Ulid::new();
        let now = self.now();
        let event = Event::CommentAdded {
            id,
            item_id,
            author_id: author,
            text: text.clone(),
            created: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("comment {id} added to item {item_id} by {author}");
        Ok(CommentInfo {
            id,
            item_id,
            text,
            author_name: user.name,
            created: now,
        })
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for user in self.store.users() {
            events.push(Event::UserCreated {
                id: user.id,
                name: user.name,
                email: user.email,
            });
        }

        for item_id in self.store.item_ids() {
            let Some(st) = self.store.item(&item_id) else { continue };
            let guard = st.read().await;
            let item = &guard.item;
            events.push(Event::ItemCreated {
                id: item.id,
                owner_id: item.owner_id,
                name: item.name.clone(),
                description: item.description.clone(),
                available: item.available,
            });
            for b in &guard.bookings {
                events.push(Event::BookingRequested {
                    id: b.id,
                    item_id: b.item_id,
                    booker_id: b.booker_id,
                    span: b.span,
                });
                match b.status {
                    BookingStatus::Waiting => {}
                    BookingStatus::Approved | BookingStatus::Rejected => {
                        events.push(Event::BookingDecided {
                            id: b.id,
                            item_id: b.item_id,
                            approved: b.status == BookingStatus::Approved,
                        });
                    }
                }
            }
            for c in &guard.comments {
                events.push(Event::CommentAdded {
                    id: c.id,
                    item_id: c.item_id,
                    author_id: c.author_id,
                    text: c.text.clone(),
                    created: c.created,
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

pub(super) fn booking_view(booking: &Booking, item: &Item, booker_name: String) -> BookingView {
    BookingView {
        id: booking.id,
        start: booking.span.start,
        end: booking.span.end,
        status: booking.status.as_str(),
        item: ItemRef {
            id: item.id,
            name: item.name.clone(),
            owner_id: item.owner_id,
            available: item.available,
        },
        booker: BookerRef {
            id: booking.booker_id,
            name: booker_name,
        },
    }
}
