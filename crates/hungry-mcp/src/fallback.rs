//! Static restaurant content used when the query worker is unavailable.

use hungry_core::{DomainResponse, ResponseData, ResponseSource, ResponseStatus, SessionId};

#[derive(Debug, Clone, Copy)]
struct Spot {
    name: &'static str,
    address: &'static str,
    area: &'static str,
    rating: f32,
    best_taco: &'static str,
    blurb: &'static str,
}

const CATALOG: &[Spot] = &[
    Spot {
        name: "Veracruz All Natural",
        address: "1704 E Cesar Chavez St",
        area: "East Austin",
        rating: 4.7,
        best_taco: "Migas taco",
        blurb: "Trailer-born spot famous for migas on handmade tortillas.",
    },
    Spot {
        name: "Valentina's Tex Mex BBQ",
        address: "11500 Menchaca Rd",
        area: "South Austin",
        rating: 4.8,
        best_taco: "Smoked brisket taco",
        blurb: "Central Texas barbecue folded into fresh flour tortillas.",
    },
    Spot {
        name: "Discada",
        address: "1319 Rosewood Ave",
        area: "East Austin",
        rating: 4.8,
        best_taco: "Discada taco",
        blurb: "One dish done right: beef and pork cooked together on a disc.",
    },
    Spot {
        name: "Tacodeli",
        address: "1500 Spyglass Dr",
        area: "Barton Creek",
        rating: 4.5,
        best_taco: "Otto taco",
        blurb: "Local chain with a long list of breakfast and lunch tacos.",
    },
    Spot {
        name: "Torchy's Tacos",
        address: "1822 S 1st St",
        area: "South Austin",
        rating: 4.3,
        best_taco: "Trailer Park taco",
        blurb: "Austin original with damn good tacos and queso.",
    },
    Spot {
        name: "Joe's Bakery",
        address: "2305 E 7th St",
        area: "East Austin",
        rating: 4.6,
        best_taco: "Bacon and egg taco",
        blurb: "Family bakery serving breakfast tacos since 1962.",
    },
    Spot {
        name: "Granny's Tacos",
        address: "1401 E 7th St",
        area: "East Austin",
        rating: 4.6,
        best_taco: "Barbacoa taco",
        blurb: "Small trailer with big flavors and fresh salsas.",
    },
    Spot {
        name: "Las Trancas",
        address: "1210 E Cesar Chavez St",
        area: "East Austin",
        rating: 4.5,
        best_taco: "Al pastor taco",
        blurb: "Late-night street tacos, cash friendly and quick.",
    },
];

/// Deterministic offline answers for every query operation.
///
/// Every response is `success = true` and tagged `static_fallback`, so
/// callers can tell it apart from worker output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFallback;

impl StaticFallback {
    pub fn new() -> Self {
        Self
    }

    pub fn search(&self, query: &str, limit: usize, session: &SessionId) -> DomainResponse {
        let needle = query.trim().to_lowercase();
        let mut hits: Vec<&Spot> = CATALOG
            .iter()
            .filter(|spot| {
                needle.is_empty()
                    || needle == "tacos"
                    || needle == "taco"
                    || matches_spot(spot, &needle)
            })
            .collect();
        if hits.is_empty() {
            // Nothing matched; offer the best-known spots instead of nothing.
            hits = ranked();
        }
        hits.truncate(limit.max(1));

        let mut lines = vec![format!(
            "Found {} taco restaurants for '{}' (offline list):",
            hits.len(),
            query
        )];
        lines.extend(hits.iter().enumerate().map(|(i, spot)| {
            format!(
                "{}. {} - {} (★{}) - Best: {}",
                i + 1,
                spot.name,
                spot.address,
                spot.rating,
                spot.best_taco
            )
        }));

        let data = ResponseData::new(
            lines.join("\n"),
            ResponseStatus::SearchCompleted,
            ResponseSource::StaticFallback,
        )
        .with_field("search_term", query);
        DomainResponse::ok(session.clone(), data)
    }

    pub fn restaurant_details(&self, restaurant_name: &str, session: &SessionId) -> DomainResponse {
        let needle = restaurant_name.trim().to_lowercase();
        let message = match CATALOG
            .iter()
            .find(|spot| !needle.is_empty() && spot.name.to_lowercase().contains(&needle))
        {
            Some(spot) => format!(
                "{}\nAddress: {}, Austin, TX\nArea: {}\nRating: ★{}\nBest taco: {}\n{}",
                spot.name, spot.address, spot.area, spot.rating, spot.best_taco, spot.blurb
            ),
            None => format!(
                "Details for '{}' are not available offline right now. Try again in a minute.",
                restaurant_name
            ),
        };

        let data = ResponseData::new(
            message,
            ResponseStatus::DetailsRetrieved,
            ResponseSource::StaticFallback,
        )
        .with_field("restaurant_name", restaurant_name);
        DomainResponse::ok(session.clone(), data)
    }

    pub fn top_rated(&self, limit: usize, session: &SessionId) -> DomainResponse {
        let mut spots = ranked();
        spots.truncate(limit.max(1));

        let mut lines = vec![format!("Top {} Rated Taco Restaurants in Austin:", spots.len())];
        lines.extend(spots.iter().enumerate().map(|(i, spot)| {
            format!(
                "{}. {} - ⭐{} - {} - {}",
                i + 1,
                spot.name,
                spot.rating,
                spot.best_taco,
                spot.address
            )
        }));

        let data = ResponseData::new(
            lines.join("\n"),
            ResponseStatus::TopRatedRetrieved,
            ResponseSource::StaticFallback,
        );
        DomainResponse::ok(session.clone(), data)
    }

    pub fn search_by_area(&self, area: &str, limit: usize, session: &SessionId) -> DomainResponse {
        let needle = area.trim().to_lowercase();
        let mut spots: Vec<&Spot> = CATALOG
            .iter()
            .filter(|spot| {
                let spot_area = spot.area.to_lowercase();
                !needle.is_empty() && (spot_area.contains(&needle) || needle.contains(&spot_area))
            })
            .collect();
        spots.truncate(limit.max(1));

        let message = if spots.is_empty() {
            format!(
                "No offline listings for the '{}' area. Try East Austin or South Austin.",
                area
            )
        } else {
            let mut lines = vec![format!("Taco restaurants in {}:", area)];
            lines.extend(spots.iter().enumerate().map(|(i, spot)| {
                format!("{}. {} - {} (★{})", i + 1, spot.name, spot.address, spot.rating)
            }));
            lines.join("\n")
        };

        let data = ResponseData::new(
            message,
            ResponseStatus::AreaSearchCompleted,
            ResponseSource::StaticFallback,
        )
        .with_field("area", area);
        DomainResponse::ok(session.clone(), data)
    }
}

fn matches_spot(spot: &Spot, needle: &str) -> bool {
    [spot.name, spot.area, spot.best_taco, spot.blurb]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
        || needle
            .split_whitespace()
            .filter(|word| word.len() > 3)
            .any(|word| spot.best_taco.to_lowercase().contains(word) || spot.blurb.to_lowercase().contains(word))
}

fn ranked() -> Vec<&'static Spot> {
    let mut spots: Vec<&Spot> = CATALOG.iter().collect();
    // Stable sort keeps catalog order for equal ratings.
    spots.sort_by(|a, b| b.rating.total_cmp(&a.rating));
    spots
}
