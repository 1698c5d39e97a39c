use ulid::Ulid;

use crate::model::*;

/// True if `user_id` has an approved booking on this item that ended before `before`.
pub(crate) fn has_completed_rental(st: &ItemState, user_id: &Ulid, before: Ms) -> bool {
    st.bookings.iter().any(|b| {
        b.booker_id == *user_id
            && b.status == BookingStatus::Approved
            && b.span.ended_before(before)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(bookings: Vec<Booking>) -> ItemState {
        let mut st = ItemState::new(Item {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: "Ladder".into(),
            description: "3m".into(),
            available: true,
        });
        for b in bookings {
            st.insert_booking(b);
        }
        st
    }

    fn booking(booker: Ulid, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            item_id: Ulid::new(),
            booker_id: booker,
            span: Span::new(end - 100, end),
            status,
        }
    }

    #[test]
    fn approved_and_ended() {
        let user = Ulid::new();
        let st = state(vec![booking(user, 1_000, BookingStatus::Approved)]);
        assert!(has_completed_rental(&st, &user, 1_001));
        // end must be strictly before
        assert!(!has_completed_rental(&st, &user, 1_000));
    }

    #[test]
    fn other_statuses_do_not_count() {
        let user = Ulid::new();
        let st = state(vec![
            booking(user, 1_000, BookingStatus::Waiting),
            booking(user, 1_000, BookingStatus::Rejected),
        ]);
        assert!(!has_completed_rental(&st, &user, 5_000));
    }

    #[test]
    fn other_bookers_do_not_count() {
        let st = state(vec![booking(Ulid::new(), 1_000, BookingStatus::Approved)]);
        assert!(!has_completed_rental(&st, &Ulid::new(), 5_000));
    }
}
