use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A booking request must describe a non-empty interval that starts in the future.
pub(crate) fn validate_span(span: &Span, now: Ms) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::InvalidRequest(
            "booking end must be after its start".into(),
        ));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    if span.start <= now {
        return Err(EngineError::InvalidRequest(
            "booking must start in the future".into(),
        ));
    }
    Ok(())
}

/// Owners never see their own item as bookable.
pub(crate) fn check_bookable(item: &Item, requester: &Ulid) -> Result<(), EngineError> {
    if item.owner_id == *requester {
        return Err(EngineError::NotFound(format!(
            "item {} cannot be booked by its owner",
            item.id
        )));
    }
    if !item.available {
        return Err(EngineError::InvalidRequest(format!(
            "item {} is not available",
            item.id
        )));
    }
    Ok(())
}

/// Only the item's owner may decide, and only once.
pub(crate) fn check_decidable(
    booking: &Booking,
    item: &Item,
    decider: &Ulid,
) -> Result<(), EngineError> {
    if item.owner_id != *decider {
        return Err(EngineError::NotFound(format!(
            "booking {} not found for user {decider}",
            booking.id
        )));
    }
    if booking.status.is_terminal() {
        return Err(EngineError::InvalidRequest(format!(
            "booking {} is already {}",
            booking.id,
            booking.status.as_str()
        )));
    }
    Ok(())
}

/// Visible to the booker and the item's owner only.
pub(crate) fn check_visible(
    booking: &Booking,
    item: &Item,
    caller: &Ulid,
) -> Result<(), EngineError> {
    if booking.booker_id != *caller && item.owner_id != *caller {
        return Err(EngineError::NotFound(format!("booking {}", booking.id)));
    }
    Ok(())
}

pub(crate) fn validate_text(
    field: &'static str,
    value: &str,
    max_len: usize,
    too_long: &'static str,
) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidRequest(format!(
            "{field} must not be blank"
        )));
    }
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded(too_long));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), EngineError> {
    validate_text("email", email, MAX_EMAIL_LEN, "email too long")?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(EngineError::InvalidRequest(format!("malformed email: {email}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(owner: Ulid, available: bool) -> Item {
        Item {
            id: Ulid::new(),
            owner_id: owner,
            name: "Saw".into(),
            description: "Hand saw".into(),
            available,
        }
    }

    fn waiting(item: &Item, booker: Ulid) -> Booking {
        Booking {
            id: Ulid::new(),
            item_id: item.id,
            booker_id: booker,
            span: Span::new(1_000, 2_000),
            status: BookingStatus::Waiting,
        }
    }

    #[test]
    fn span_must_not_be_inverted_or_empty() {
        let inverted = validate_span(&Span::new(2_000, 1_000), 0);
        assert!(matches!(inverted, Err(EngineError::InvalidRequest(_))));
        let empty = validate_span(&Span::new(1_000, 1_000), 0);
        assert!(matches!(empty, Err(EngineError::InvalidRequest(_))));
        assert!(validate_span(&Span::new(1_000, 1_001), 0).is_ok());
    }

    #[test]
    fn span_must_start_in_future() {
        let starting_now = validate_span(&Span::new(1_000, 2_000), 1_000);
        assert!(matches!(starting_now, Err(EngineError::InvalidRequest(_))));
        let started = validate_span(&Span::new(1_000, 2_000), 1_500);
        assert!(matches!(started, Err(EngineError::InvalidRequest(_))));
        assert!(validate_span(&Span::new(1_000, 2_000), 999).is_ok());
    }

    #[test]
    fn span_limits() {
        let out_of_range = Span::new(1_000, MAX_VALID_TIMESTAMP_MS + 1);
        assert!(matches!(
            validate_span(&out_of_range, 0),
            Err(EngineError::LimitExceeded(_))
        ));
        let too_wide = Span::new(1_000, 1_000 + MAX_SPAN_DURATION_MS + 1);
        assert!(matches!(
            validate_span(&too_wide, 0),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn owner_cannot_book_own_item() {
        let owner = Ulid::new();
        let it = item(owner, true);
        assert!(matches!(check_bookable(&it, &owner), Err(EngineError::NotFound(_))));
        // Ownership is checked before availability.
        let unavailable = item(owner, false);
        assert!(matches!(check_bookable(&unavailable, &owner), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn unavailable_item_rejected() {
        let it = item(Ulid::new(), false);
        assert!(matches!(check_bookable(&it, &Ulid::new()), Err(EngineError::InvalidRequest(_))));
        let ok = item(Ulid::new(), true);
        assert!(check_bookable(&ok, &Ulid::new()).is_ok());
    }

    #[test]
    fn only_owner_decides_once() {
        let owner = Ulid::new();
        let booker = Ulid::new();
        let it = item(owner, true);
        let mut b = waiting(&it, booker);
        assert!(matches!(check_decidable(&b, &it, &booker), Err(EngineError::NotFound(_))));
        assert!(check_decidable(&b, &it, &owner).is_ok());
        b.status = BookingStatus::Approved;
        assert!(matches!(check_decidable(&b, &it, &owner), Err(EngineError::InvalidRequest(_))));
        b.status = BookingStatus::Rejected;
        assert!(matches!(check_decidable(&b, &it, &owner), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn visibility_limited_to_parties() {
        let owner = Ulid::new();
        let booker = Ulid::new();
        let it = item(owner, true);
        let b = waiting(&it, booker);
        assert!(check_visible(&b, &it, &owner).is_ok());
        assert!(check_visible(&b, &it, &booker).is_ok());
        assert!(matches!(check_visible(&b, &it, &Ulid::new()), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn text_and_email_validation() {
        assert!(validate_text("name", "  ", MAX_NAME_LEN, "name too long").is_err());
        assert!(matches!(
            validate_text("name", &"x".repeat(MAX_NAME_LEN + 1), MAX_NAME_LEN, "name too long"),
            Err(EngineError::LimitExceeded("name too long"))
        ));
        assert!(validate_email("a@b.c").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@domain").is_err());
        assert!(validate_email("local@").is_err());
    }
}
