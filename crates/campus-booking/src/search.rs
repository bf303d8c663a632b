//! Token search over products and visits.
//!
//! The index keeps one lower-cased text blob per entity. It is not part of
//! snapshots and is rebuilt after loading.

use std::collections::BTreeMap;

use crate::ids::{ProductId, VisitId};
use crate::store::BookingStore;
use crate::visits::BookingStatus;

#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    products: BTreeMap<ProductId, String>,
    visits: BTreeMap<VisitId, String>,
}

fn tokens(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

fn matches_all(text: &str, query: &[String]) -> bool {
    query.iter().all(|token| text.contains(token.as_str()))
}

impl BookingStore {
    fn product_search_text(&self, product: ProductId) -> Option<String> {
        let p = self.products.get(&product)?;
        let unit = self
            .units
            .get(&p.unit)
            .map(|u| u.name.as_str())
            .unwrap_or_default();
        Some([p.title.as_str(), p.teaser.as_str(), p.description.as_str(), unit].join(" ").to_lowercase())
    }

    fn visit_search_text(&self, visit: VisitId) -> Option<String> {
        let v = self.visits.get(&visit)?;
        let mut parts = vec![self.product_search_text(v.product).unwrap_or_default()];
        parts.push(v.comments.to_lowercase());
        for booking in self.bookings_for_visit(visit) {
            if booking.status == BookingStatus::Cancelled {
                continue;
            }
            if let Some(guest) = self.guests.get(&booking.guest) {
                parts.push(guest.full_name().to_lowercase());
                parts.push(guest.school.to_lowercase());
            }
        }
        Some(parts.join(" "))
    }

    pub fn refresh_product_search(&mut self, product: ProductId) {
        match self.product_search_text(product) {
            Some(text) => {
                self.search.products.insert(product, text);
            }
            None => {
                self.search.products.remove(&product);
            }
        }
        let visits: Vec<VisitId> = self
            .visits
            .values()
            .filter(|v| v.product == product)
            .map(|v| v.id)
            .collect();
        for visit in visits {
            self.refresh_visit_search(visit);
        }
    }

    pub fn refresh_visit_search(&mut self, visit: VisitId) {
        match self.visit_search_text(visit) {
            Some(text) => {
                self.search.visits.insert(visit, text);
            }
            None => {
                self.search.visits.remove(&visit);
            }
        }
    }

    pub fn rebuild_search_index(&mut self) {
        self.search = SearchIndex::default();
        let products: Vec<ProductId> = self.products.keys().copied().collect();
        for product in products {
            if let Some(text) = self.product_search_text(product) {
                self.search.products.insert(product, text);
            }
        }
        let visits: Vec<VisitId> = self.visits.keys().copied().collect();
        for visit in visits {
            self.refresh_visit_search(visit);
        }
    }

    /// Products whose text contains every whitespace-separated token of `query`.
    pub fn search_products(&self, query: &str) -> Vec<ProductId> {
        let query = tokens(query);
        self.search
            .products
            .iter()
            .filter(|(_, text)| matches_all(text, &query))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn search_visits(&self, query: &str) -> Vec<VisitId> {
        let query = tokens(query);
        self.search
            .visits
            .iter()
            .filter(|(_, text)| matches_all(text, &query))
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::TimeMode;
    use crate::store::test_support::*;
    use crate::visits::GuestDraft;

    #[test]
    fn products_and_visits_match_every_token() {
        let mut fx = Fixture::resource_controlled(0, 0);
        let product = fx.add_product(TimeMode::SpecificTimes);
        fx.store.products.get_mut(&product).expect("product").title =
            "Chemistry Lab Day".to_string();
        fx.store.refresh_product_search(product);

        assert_eq!(fx.store.search_products("chemistry LAB"), vec![product]);
        assert!(fx.store.search_products("chemistry physics").is_empty());

        let time = fx.add_time_for(product, 10, 12);
        let visit = fx.make_visit(time);
        fx.store
            .book(
                visit,
                GuestDraft {
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    email: "ada@school.example".into(),
                    phone: String::new(),
                    school: "Riverside Gymnasium".into(),
                    grade_level: String::new(),
                    attendee_count: 4,
                    teacher_count: 1,
                },
                at(1),
            )
            .expect("booked");
        assert_eq!(fx.store.search_visits("riverside chemistry"), vec![visit]);
        assert!(fx.store.search_visits("northside").is_empty());
    }

    #[test]
    fn rebuilding_restores_the_index() {
        let mut fx = Fixture::resource_controlled(0, 0);
        let product = fx.add_product(TimeMode::SpecificTimes);
        let title = fx.store.products[&product].title.to_lowercase();
        let mut restored = fx.store.clone();
        restored.rebuild_search_index();
        assert!(restored.search_products(&title).contains(&product));
    }
}
