use crate::model::*;

/// Keep the bookings matching `state` at `now`, order them by start
/// descending, and cut out the page window.
///
/// The sort is stable, so bookings sharing a start keep their input order.
pub fn order_and_page<T>(
    rows: Vec<(Booking, T)>,
    state: BookingState,
    now: Ms,
    page: Page,
) -> Vec<(Booking, T)> {
    let mut matching: Vec<(Booking, T)> = rows
        .into_iter()
        .filter(|(b, _)| state.matches(b, now))
        .collect();
    matching.sort_by(|a, b| b.0.span.start.cmp(&a.0.span.start));
    matching
        .into_iter()
        .skip(page.offset())
        .take(page.size)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn b(start: Ms, end: Ms, status: BookingStatus) -> (Booking, ()) {
        (
            Booking {
                id: Ulid::new(),
                item_id: Ulid::new(),
                booker_id: Ulid::new(),
                span: Span::new(start, end),
                status,
            },
            (),
        )
    }

    fn starts(rows: &[(Booking, ())]) -> Vec<Ms> {
        rows.iter().map(|(b, _)| b.span.start).collect()
    }

    #[test]
    fn all_ordered_by_start_descending() {
        let rows = vec![
            b(100, 200, BookingStatus::Waiting),
            b(500, 600, BookingStatus::Approved),
            b(300, 400, BookingStatus::Rejected),
        ];
        let out = order_and_page(rows, BookingState::All, 0, Page::new(0, 10).unwrap());
        assert_eq!(starts(&out), vec![500, 300, 100]);
    }

    #[test]
    fn temporal_filters_relative_to_now() {
        let rows = || {
            vec![
                b(100, 200, BookingStatus::Approved),  // past
                b(900, 1_100, BookingStatus::Approved), // current
                b(2_000, 3_000, BookingStatus::Waiting), // future
            ]
        };
        let page = Page::new(0, 10).unwrap();
        assert_eq!(starts(&order_and_page(rows(), BookingState::Past, 1_000, page)), vec![100]);
        assert_eq!(starts(&order_and_page(rows(), BookingState::Current, 1_000, page)), vec![900]);
        assert_eq!(starts(&order_and_page(rows(), BookingState::Future, 1_000, page)), vec![2_000]);
    }

    #[test]
    fn status_filters() {
        let rows = vec![
            b(100, 200, BookingStatus::Waiting),
            b(300, 400, BookingStatus::Rejected),
            b(500, 600, BookingStatus::Approved),
            b(700, 800, BookingStatus::Waiting),
        ];
        let page = Page::new(0, 10).unwrap();
        let waiting = order_and_page(rows.clone(), BookingState::Waiting, 0, page);
        assert_eq!(starts(&waiting), vec![700, 100]);
        let rejected = order_and_page(rows, BookingState::Rejected, 0, page);
        assert_eq!(starts(&rejected), vec![300]);
    }

    #[test]
    fn paging_windows() {
        let rows: Vec<_> = (0..7)
            .map(|i| b(i * 100, i * 100 + 50, BookingStatus::Waiting))
            .collect();
        let first = order_and_page(rows.clone(), BookingState::All, 0, Page::new(0, 3).unwrap());
        assert_eq!(starts(&first), vec![600, 500, 400]);
        let second = order_and_page(rows.clone(), BookingState::All, 0, Page::new(3, 3).unwrap());
        assert_eq!(starts(&second), vec![300, 200, 100]);
        let last = order_and_page(rows.clone(), BookingState::All, 0, Page::new(6, 3).unwrap());
        assert_eq!(starts(&last), vec![0]);
        let beyond = order_and_page(rows, BookingState::All, 0, Page::new(9, 3).unwrap());
        assert!(beyond.is_empty());
    }

    #[test]
    fn unaligned_from_starts_at_its_page() {
        let rows: Vec<_> = (0..6)
            .map(|i| b(i * 100, i * 100 + 50, BookingStatus::Waiting))
            .collect();
        // from = 4, size = 3 → page index 1 → items [3, 6)
        let out = order_and_page(rows, BookingState::All, 0, Page::new(4, 3).unwrap());
        assert_eq!(starts(&out), vec![200, 100, 0]);
    }
}
