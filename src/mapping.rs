// Tolerant mapping of upstream documents into canonical records
//
// Every collection is read through `as_list` and every scalar through the text
// accessors, so a missing node or a single-object-instead-of-array never aborts
// a mapping. Fields that cannot be parsed fall back to a default and are logged.
use crate::document::{self, as_list, at, int_at, text, text_at, MALFORMED_PAYLOAD_STATUS};
use crate::error::FailureKind;
use crate::model::{
    Address, AvailabilitySlot, BasicProductInfo, BookingType, DateYmd, Extra, GeoPoint, MeetingType,
    PickupDropoffPlace, Price, PricePerBooking, PricePerPerson, PricingCategory,
    PricingCategoryWithPrice, ProductCategory, ProductDescription, Rate, RateWithPrice,
    TicketSupport, TicketType, Time,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

pub const DEFAULT_RATE_ID: &str = "standard_rate";
pub const DEFAULT_RATE_LABEL: &str = "Standard Rate";
const RATE_MARKER: &str = "rate_id";

fn degraded(field: &str, detail: impl std::fmt::Display) {
    let kind = FailureKind::MappingDegraded(format!("{field}: {detail}"));
    warn!(field, "{kind}");
}

pub fn default_rate() -> Rate {
    Rate {
        id: DEFAULT_RATE_ID.to_string(),
        label: DEFAULT_RATE_LABEL.to_string(),
    }
}

fn tour_node(doc: &Value) -> Result<&Value, FailureKind> {
    let tour = at(doc, &["tour"]);
    if tour.is_object() {
        Ok(tour)
    } else {
        Err(FailureKind::rejected(
            MALFORMED_PAYLOAD_STATUS,
            "response carries no tour",
        ))
    }
}

pub fn departures(doc: &Value) -> Vec<&Value> {
    as_list(at(doc, &["tour", "dates_and_prices", "departure"]))
}

// Main price rows first, then the extra rates, each flagged with whether it is the main row
fn price_rows(departure: &Value) -> Vec<(&Value, bool)> {
    let mut rows: Vec<(&Value, bool)> = as_list(at(departure, &["main_price"]))
        .into_iter()
        .map(|row| (row, true))
        .collect();
    rows.extend(
        as_list(at(departure, &["extra_rates", "rate"]))
            .into_iter()
            .map(|row| (row, false)),
    );
    rows
}

fn field_marker(node: &Value, marker: &str) -> Option<String> {
    as_list(at(node, &["fields", "field"]))
        .into_iter()
        .find(|field| {
            let key = text(at(field, &["name"])).or_else(|| text(at(field, &["key"])));
            key.as_deref() == Some(marker)
        })
        .and_then(|field| text(at(field, &["value"])))
}

fn push_unique<T, F>(items: &mut Vec<T>, item: T, same: F)
where
    F: Fn(&T, &T) -> bool,
{
    if !items.iter().any(|existing| same(existing, &item)) {
        items.push(item);
    }
}

// Rate discovery

type RateSource = fn(&Value, &Value) -> Vec<Rate>;

const RATE_SOURCES: [(&str, RateSource); 3] = [
    ("departure price rows", rates_from_price_rows),
    ("people selection", rates_from_people_selection),
    ("departure field markers", rates_from_field_markers),
];

fn rates_from_price_rows(_tour: &Value, departures_doc: &Value) -> Vec<Rate> {
    let mut rates = Vec::new();
    for departure in departures(departures_doc) {
        for (row, _) in price_rows(departure) {
            let id = text_at(row, &["rate_id"]);
            if id.is_empty() {
                continue;
            }
            let label = text(at(row, &["rate_name"])).unwrap_or_else(|| id.clone());
            push_unique(&mut rates, Rate { id, label }, |a, b| a.id == b.id);
        }
    }
    rates
}

fn rates_from_people_selection(tour: &Value, _departures_doc: &Value) -> Vec<Rate> {
    let mut rates = Vec::new();
    for rate in as_list(at(tour, &["new_booking", "people_selection", "rate"])) {
        let id = text_at(rate, &["rate_id"]);
        let label = text_at(rate, &["label_1"]);
        if id.is_empty() || label.is_empty() {
            continue;
        }
        push_unique(&mut rates, Rate { id, label }, |a, b| a.id == b.id);
    }
    rates
}

fn rates_from_field_markers(_tour: &Value, departures_doc: &Value) -> Vec<Rate> {
    let mut rates = Vec::new();
    for departure in departures(departures_doc) {
        if let Some(id) = field_marker(departure, RATE_MARKER) {
            let rate = Rate {
                label: id.clone(),
                id,
            };
            push_unique(&mut rates, rate, |a, b| a.id == b.id);
        }
    }
    rates
}

/// First non-empty source wins; with no source at all a single standard rate is returned.
pub fn discover_rates(tour: &Value, departures_doc: &Value) -> Vec<Rate> {
    RATE_SOURCES
        .iter()
        .find_map(|(name, source)| {
            let rates = source(tour, departures_doc);
            if rates.is_empty() {
                None
            } else {
                debug!(source = *name, count = rates.len(), "rates discovered");
                Some(rates)
            }
        })
        .unwrap_or_else(|| vec![default_rate()])
}

// Pricing categories

fn age(node: &Value, key: &str) -> u32 {
    match text(at(node, &[key])) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            degraded(key, format!("not an age: {raw}"));
            0
        }),
        None => 0,
    }
}

fn categories_from_price_rows(_tour: &Value, departures_doc: &Value) -> Vec<PricingCategory> {
    let mut categories = Vec::new();
    for departure in departures(departures_doc) {
        for (row, _) in price_rows(departure) {
            let id = text_at(row, &["rate_id"]);
            if id.is_empty() {
                continue;
            }
            let category = PricingCategory {
                label: text(at(row, &["rate_name"])).unwrap_or_else(|| id.clone()),
                min_age: age(row, "agerange_min"),
                max_age: age(row, "agerange_max"),
                id,
            };
            push_unique(&mut categories, category, |a, b| a.id == b.id);
        }
    }
    categories
}

fn categories_from_people_selection(tour: &Value, _departures_doc: &Value) -> Vec<PricingCategory> {
    let mut categories = Vec::new();
    for rate in as_list(at(tour, &["new_booking", "people_selection", "rate"])) {
        let label_1 = text_at(rate, &["label_1"]);
        let label_2 = text_at(rate, &["label_2"]);
        let id = text(at(rate, &["rate_id"])).unwrap_or_else(|| label_1.clone());
        if id.is_empty() {
            continue;
        }
        let label = if label_2.is_empty() {
            label_1
        } else {
            format!("{label_1} {label_2}")
        };
        let category = PricingCategory {
            id,
            label,
            min_age: age(rate, "agerange_min"),
            max_age: age(rate, "agerange_max"),
        };
        push_unique(&mut categories, category, |a, b| a.id == b.id);
    }
    categories
}

type CategorySource = fn(&Value, &Value) -> Vec<PricingCategory>;

const CATEGORY_SOURCES: [CategorySource; 2] =
    [categories_from_price_rows, categories_from_people_selection];

pub fn pricing_categories(tour: &Value, departures_doc: &Value) -> Vec<PricingCategory> {
    CATEGORY_SOURCES
        .iter()
        .map(|source| source(tour, departures_doc))
        .find(|categories| !categories.is_empty())
        .unwrap_or_default()
}

// Booking type and start times

pub fn departure_start_times(departures_doc: &Value) -> BTreeSet<Time> {
    let mut times = BTreeSet::new();
    for departure in departures(departures_doc) {
        if let Some(raw) = text(at(departure, &["start_time"])) {
            match Time::parse(&raw) {
                Some(time) => {
                    times.insert(time);
                }
                None => degraded("start_time", format!("not a time: {raw}")),
            }
        }
    }
    times
}

type BookingTypeSource = fn(&Value, &BTreeSet<Time>) -> Option<BookingType>;

const BOOKING_TYPE_SOURCES: [BookingTypeSource; 2] =
    [booking_type_from_times, booking_type_from_date_type];

fn booking_type_from_times(_tour: &Value, times: &BTreeSet<Time>) -> Option<BookingType> {
    (!times.is_empty()).then_some(BookingType::DateAndTime)
}

fn booking_type_from_date_type(tour: &Value, _times: &BTreeSet<Time>) -> Option<BookingType> {
    let raw = text(at(tour, &["new_booking", "date_selection", "date_type"]))?;
    match raw.parse() {
        Ok(kind) => Some(kind),
        Err(e) => {
            degraded("date_type", e);
            None
        }
    }
}

pub fn infer_booking_type(tour: &Value, times: &BTreeSet<Time>) -> BookingType {
    BOOKING_TYPE_SOURCES
        .iter()
        .find_map(|source| source(tour, times))
        .unwrap_or_else(|| {
            debug!("no booking type found, defaulting to DATE");
            BookingType::Date
        })
}

/// Normalized, de-duplicated and sorted by (hour, minute), including the product default.
pub fn start_times(tour: &Value, departure_times: &BTreeSet<Time>) -> Vec<Time> {
    let mut times = departure_times.clone();
    if let Some(raw) = text(at(tour, &["start_time"])) {
        match Time::parse(&raw) {
            Some(time) => {
                times.insert(time);
            }
            None => degraded("start_time", format!("not a time: {raw}")),
        }
    }
    times.into_iter().collect()
}

// Meeting and pickup

pub fn meeting_type(has_pickup_points: bool, pickup_on_request: bool) -> MeetingType {
    match (has_pickup_points, pickup_on_request) {
        (true, true) => MeetingType::MeetOnLocationOrPickUp,
        (true, false) => MeetingType::PickUp,
        (false, _) => MeetingType::MeetOnLocation,
    }
}

pub fn parse_geocode(raw: &str) -> Option<GeoPoint> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 2 {
        if !raw.trim().is_empty() {
            degraded("geocode", format!("expected lat,lon: {raw}"));
        }
        return None;
    }
    match (parts[0].parse::<f64>(), parts[1].parse::<f64>()) {
        (Ok(latitude), Ok(longitude)) => Some(GeoPoint {
            latitude,
            longitude,
        }),
        _ => {
            degraded("geocode", format!("not numeric: {raw}"));
            None
        }
    }
}

fn pickup_points(tour: &Value) -> Vec<&Value> {
    let points = at(tour, &["pickup_points"]);
    let nested = at(points, &["pickup"]);
    if nested.is_null() {
        as_list(points)
    } else {
        as_list(nested)
    }
}

fn pickup_place(point: &Value, city: &str, country: &str) -> PickupDropoffPlace {
    PickupDropoffPlace {
        title: text_at(point, &["pickup_name"]),
        address: Address {
            address_line1: text_at(point, &["address1"]),
            address_line2: text_at(point, &["address2"]),
            postal_code: text_at(point, &["postcode"]),
            city: city.to_string(),
            country_code: country.to_string(),
            geo_point: text(at(point, &["geocode"])).and_then(|raw| parse_geocode(&raw)),
        },
    }
}

fn ticket_type(tour: &Value) -> TicketType {
    let format = as_list(at(tour, &["delivery_formats", "delivery_format"]))
        .into_iter()
        .find_map(text);
    match format {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            degraded("delivery_format", e);
            TicketType::QrCode
        }),
        None => TicketType::QrCode,
    }
}

fn extras(tour: &Value) -> Vec<Extra> {
    as_list(at(tour, &["options", "option"]))
        .into_iter()
        .filter_map(|option| {
            let id = text(at(option, &["option_id"]))?;
            Some(Extra {
                id,
                title: text_at(option, &["option_name"]),
                description: text_at(option, &["short_description"]),
                optional: true,
                max_per_booking: 1,
                limit_by_pax: false,
                increases_capacity: false,
            })
        })
        .collect()
}

fn single(value: String) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        vec![value]
    }
}

/// Full product description from the tour detail and its departures.
pub fn map_product(
    show_doc: &Value,
    departures_doc: &Value,
) -> Result<ProductDescription, FailureKind> {
    let tour = tour_node(show_doc)?;
    let id = text_at(tour, &["tour_id"]);
    if id.is_empty() {
        return Err(FailureKind::rejected(MALFORMED_PAYLOAD_STATUS, "tour has no id"));
    }

    let departure_times = departure_start_times(departures_doc);
    let booking_type = infer_booking_type(tour, &departure_times);
    let start_times = match booking_type {
        BookingType::DateAndTime => start_times(tour, &departure_times),
        BookingType::Date => Vec::new(),
    };

    let city = text_at(tour, &["location"]);
    let country = text_at(tour, &["country"]);
    let points = pickup_points(tour);
    let on_request = int_at(tour, &["pickup_on_request"]) == Some(1);
    let meeting = meeting_type(!points.is_empty(), on_request);

    let places: Vec<PickupDropoffPlace> = points
        .iter()
        .map(|point| pickup_place(point, &city, &country))
        .collect();
    let dropoff_available = on_request && !places.is_empty();

    let pickup_minutes_before = if meeting.offers_pickup() {
        int_at(tour, &["pickup_minutes_before"]).and_then(|m| u32::try_from(m).ok())
    } else {
        None
    };

    Ok(ProductDescription {
        id,
        name: text_at(tour, &["tour_name"]),
        description: text_at(tour, &["shortdesc"]),
        pricing_categories: pricing_categories(tour, departures_doc),
        rates: discover_rates(tour, departures_doc),
        booking_type,
        dropoff_available,
        dropoff_places: if dropoff_available { places.clone() } else { Vec::new() },
        custom_dropoff_place_allowed: false,
        product_category: ProductCategory::Activities,
        ticket_support: vec![TicketSupport::TicketPerPerson],
        countries: single(country),
        cities: single(city),
        start_times,
        ticket_type: ticket_type(tour),
        meeting_type: meeting,
        custom_pickup_place_allowed: meeting.offers_pickup() && on_request,
        pickup_minutes_before,
        pickup_places: if meeting.offers_pickup() { places } else { Vec::new() },
        extras: extras(tour),
    })
}

// Search listing

pub fn map_product_list(search_doc: &Value) -> Vec<BasicProductInfo> {
    as_list(at(search_doc, &["tour"]))
        .into_iter()
        .filter_map(|tour| {
            let id = text(at(tour, &["tour_id"]))?;
            Some(BasicProductInfo {
                id,
                name: text_at(tour, &["tour_name"]),
                description: text_at(tour, &["shortdesc"]),
                pricing_categories: Vec::new(),
                cities: single(text_at(tour, &["location"])),
                countries: single(text_at(tour, &["country"])),
            })
        })
        .collect()
}

// Used when departures cannot be loaded for a listed tour
pub fn from_price_category(search_doc: &Value, tour_id: &str) -> PricingCategory {
    let tour = as_list(at(search_doc, &["tour"]))
        .into_iter()
        .find(|tour| text_at(tour, &["tour_id"]) == tour_id)
        .unwrap_or(&Value::Null);
    PricingCategory {
        id: format!("{}_{}", tour_id, text_at(tour, &["from_price"])),
        label: text_at(tour, &["from_price_display"]),
        min_age: 0,
        max_age: 0,
    }
}

// Availability

#[derive(Debug)]
struct SlotAccumulator {
    capacity: u32,
    per_person: Vec<PricingCategoryWithPrice>,
    per_booking: Option<PricePerBooking>,
}

fn capacity(departure: &Value) -> u32 {
    match text(at(departure, &["spaces_remaining"])) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) => u32::try_from(n.max(0)).unwrap_or(u32::MAX),
            Err(_) => {
                degraded("spaces_remaining", format!("not a number: {raw}"));
                0
            }
        },
        None => 0,
    }
}

/// Availability slots merged by (date, time, rate id), ordered, with exhausted slots removed.
pub fn map_availability(departures_doc: &Value) -> Vec<AvailabilitySlot> {
    let currency = text_at(departures_doc, &["tour", "sale_currency"]);
    let mut slots: BTreeMap<(DateYmd, Option<Time>, String), SlotAccumulator> = BTreeMap::new();

    for departure in departures(departures_doc) {
        let raw_date = text_at(departure, &["start_date"]);
        let Some(date) = DateYmd::parse(&raw_date) else {
            degraded("start_date", format!("not a date: {raw_date}"));
            continue;
        };
        let time = text(at(departure, &["start_time"])).and_then(|raw| Time::parse(&raw));
        let capacity = capacity(departure);

        for (row, is_main) in price_rows(departure) {
            let rate_id = text_at(row, &["rate_id"]);
            if rate_id.is_empty() {
                degraded("rate_id", "price row without rate id");
                continue;
            }
            let price = Price {
                amount: text(at(row, &["rate_price"])).unwrap_or_else(|| "0".to_string()),
                currency: currency.clone(),
            };
            let category_price = PricingCategoryWithPrice {
                pricing_category_id: rate_id.clone(),
                price: price.clone(),
            };
            let per_booking = is_main.then(|| PricePerBooking { price });

            let slot = slots
                .entry((date, time, rate_id))
                .or_insert_with(|| SlotAccumulator {
                    capacity,
                    per_person: Vec::new(),
                    per_booking: None,
                });
            push_unique(&mut slot.per_person, category_price, |a, b| {
                a.pricing_category_id == b.pricing_category_id
            });
            if slot.per_booking.is_none() {
                slot.per_booking = per_booking;
            }
        }
    }

    slots
        .into_iter()
        .filter(|(_, slot)| slot.capacity > 0)
        .map(|((date, time, rate_id), slot)| AvailabilitySlot {
            date,
            time,
            capacity: slot.capacity,
            rates: vec![RateWithPrice {
                rate_id,
                price_per_person: Some(PricePerPerson {
                    pricing_category_with_price: slot.per_person,
                }),
                price_per_booking: slot.per_booking,
            }],
        })
        .collect()
}

/// Smallest numeric remaining capacity across OPEN dates, 0 when there is none.
pub fn minimum_open_capacity(dates_doc: &Value) -> u64 {
    as_list(at(dates_doc, &["dates_and_prices", "date"]))
        .into_iter()
        .filter(|date| text_at(date, &["status"]) == "OPEN")
        .filter_map(|date| {
            let raw = text_at(date, &["spaces_remaining"]);
            if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
                raw.parse::<u64>().ok()
            } else {
                None
            }
        })
        .min()
        .unwrap_or(0)
}

// Booking documents

#[derive(Debug, Clone, PartialEq)]
pub struct AvailableComponent {
    pub component_key: String,
    pub start_date: Option<DateYmd>,
    pub start_time: Option<Time>,
    pub rate_tag: Option<String>,
    pub total_price: String,
    pub currency: String,
}

fn rate_tag(component: &Value) -> Option<String> {
    text(at(component, &["rate_id"]))
        .or_else(|| field_marker(component, RATE_MARKER))
        .or_else(|| text(at(component, &["date_code"])))
}

pub fn available_components(check_doc: &Value) -> Vec<AvailableComponent> {
    as_list(at(check_doc, &["available_components", "component"]))
        .into_iter()
        .filter_map(|component| {
            let component_key = text(at(component, &["component_key"]))?;
            Some(AvailableComponent {
                component_key,
                start_date: DateYmd::parse(&text_at(component, &["start_date"])),
                start_time: text(at(component, &["start_time"])).and_then(|raw| Time::parse(&raw)),
                rate_tag: rate_tag(component),
                total_price: text_at(component, &["total_price"]),
                currency: text_at(component, &["sale_currency"]),
            })
        })
        .collect()
}

/// Exact rate match among the components at the requested time, else the first of them.
pub fn select_component<'a>(
    components: &'a [AvailableComponent],
    time: Option<Time>,
    rate_id: &str,
) -> Option<&'a AvailableComponent> {
    let candidates: Vec<&AvailableComponent> = components
        .iter()
        .filter(|c| match (time, c.start_time) {
            (Some(wanted), Some(offered)) => wanted == offered,
            _ => true,
        })
        .collect();
    candidates
        .iter()
        .find(|c| c.rate_tag.as_deref() == Some(rate_id))
        .or_else(|| candidates.first())
        .copied()
}

pub fn booking_id(doc: &Value) -> Option<String> {
    text(at(doc, &["booking", "booking_id"]))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComponentLink {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BookedComponent {
    pub component_name: String,
    pub product_id: String,
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
    pub sale_quantity: String,
    pub rate_description: String,
    pub links: Vec<ComponentLink>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommitResult {
    pub booking_id: String,
    pub booking_uuid: String,
    pub channel_id: String,
    pub account_id: String,
    pub status: String,
    pub status_text: String,
    pub voucher_url: Option<String>,
    pub barcode_data: Option<String>,
    pub components: Vec<BookedComponent>,
}

pub fn map_commit(doc: &Value) -> Result<CommitResult, FailureKind> {
    let booking = at(doc, &["booking"]);
    let booking_id = text_at(booking, &["booking_id"]);
    if booking_id.is_empty() {
        return Err(FailureKind::rejected(200, "commit response carries no booking id"));
    }

    let components = as_list(at(booking, &["components", "component"]))
        .into_iter()
        .map(|component| BookedComponent {
            component_name: text_at(component, &["component_name"]),
            product_id: text_at(component, &["product_id"]),
            start_date: text_at(component, &["start_date"]),
            start_time: text_at(component, &["start_time"]),
            end_date: text_at(component, &["end_date"]),
            end_time: text_at(component, &["end_time"]),
            sale_quantity: text_at(component, &["sale_quantity"]),
            rate_description: text_at(component, &["rate_description"]),
            links: as_list(at(component, &["urls", "url"]))
                .into_iter()
                .filter_map(|url| {
                    Some(ComponentLink {
                        label: text_at(url, &["label"]),
                        url: text(at(url, &["link"]))?,
                    })
                })
                .collect(),
        })
        .collect();

    Ok(CommitResult {
        booking_id,
        booking_uuid: text_at(booking, &["booking_uuid"]),
        channel_id: text_at(booking, &["channel_id"]),
        account_id: text_at(booking, &["account_id"]),
        status: text_at(booking, &["status"]),
        status_text: text_at(booking, &["status_text"]),
        voucher_url: text(at(booking, &["voucher_url"])),
        barcode_data: text(at(booking, &["barcode_data"])),
        components,
    })
}

pub fn parse(raw: &str) -> Result<Value, FailureKind> {
    document::parse_ok(raw)
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const TOUR_SHOW: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<response>
  <error>OK</error>
  <tour>
    <tour_id>48</tour_id>
    <tour_name>Harbour &amp; Old Town Walk</tour_name>
    <shortdesc>Two hours on foot</shortdesc>
    <location>Lisbon</location>
    <country>PT</country>
    <start_time>8:30</start_time>
    <pickup_on_request>1</pickup_on_request>
    <pickup_minutes_before>15</pickup_minutes_before>
    <pickup_points>
      <pickup>
        <pickup_name>Hotel Avenida</pickup_name>
        <address1>Av. da Liberdade 1</address1>
        <postcode>1250-096</postcode>
        <geocode>38.7167,-9.1420</geocode>
      </pickup>
      <pickup>
        <pickup_name>Cais do Sodre</pickup_name>
        <geocode>38.70</geocode>
      </pickup>
    </pickup_points>
    <delivery_formats><delivery_format>QR_CODE</delivery_format></delivery_formats>
    <new_booking>
      <date_selection><date_type>DATE</date_type></date_selection>
      <people_selection>
        <rate><rate_id>r1</rate_id><label_1>Adult</label_1><agerange_min>18</agerange_min></rate>
      </people_selection>
    </new_booking>
    <options>
      <option><option_id>7</option_id><option_name>Lunch</option_name><short_description>Set menu</short_description></option>
    </options>
  </tour>
</response>"#;

    pub const DEPARTURES: &str = r#"<response>
  <error>OK</error>
  <tour>
    <tour_id>48</tour_id>
    <sale_currency>EUR</sale_currency>
    <dates_and_prices>
      <departure>
        <start_date>2025-06-01</start_date>
        <start_time>10:00</start_time>
        <spaces_remaining>8</spaces_remaining>
        <main_price><rate_id>r1</rate_id><rate_name>Adult</rate_name><rate_price>40.00</rate_price><agerange_min>18</agerange_min></main_price>
        <extra_rates>
          <rate><rate_id>r2</rate_id><rate_name>Child</rate_name><rate_price>20.00</rate_price><agerange_min>4</agerange_min><agerange_max>17</agerange_max></rate>
        </extra_rates>
      </departure>
      <departure>
        <start_date>2025-06-01</start_date>
        <start_time>9:05</start_time>
        <spaces_remaining>0</spaces_remaining>
        <main_price><rate_id>r1</rate_id><rate_name>Adult</rate_name><rate_price>40.00</rate_price></main_price>
      </departure>
    </dates_and_prices>
  </tour>
</response>"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn departure_doc(departures: Value) -> Value {
        json!({"tour": {"sale_currency": "EUR", "dates_and_prices": {"departure": departures}}})
    }

    #[test]
    fn test_duplicate_slot_rows_merge_prices() {
        let doc = departure_doc(json!([
            {"start_date": "2025-06-01", "start_time": "10:00", "spaces_remaining": "5",
             "main_price": {"rate_id": "r1", "rate_price": "40"}},
            {"start_date": "2025-06-01", "start_time": "10:00", "spaces_remaining": "3",
             "extra_rates": {"rate": [{"rate_id": "r1", "rate_price": "40"}]}},
            {"start_date": "2025-06-01", "start_time": "10:00", "spaces_remaining": "5",
             "extra_rates": {"rate": {"rate_id": "r2", "rate_price": "20"}}}
        ]));

        let slots = map_availability(&doc);
        assert_eq!(slots.len(), 2);
        let r1 = &slots[0];
        assert_eq!(r1.rates[0].rate_id, "r1");
        assert_eq!(r1.capacity, 5);
        let per_person = r1.rates[0].price_per_person.as_ref().unwrap();
        assert_eq!(per_person.pricing_category_with_price.len(), 1);
        assert_eq!(
            r1.rates[0].price_per_booking.as_ref().unwrap().price.amount,
            "40"
        );
        assert!(slots[1].rates[0].price_per_booking.is_none());
    }

    #[test]
    fn test_per_booking_price_filled_by_later_row() {
        let doc = departure_doc(json!([
            {"start_date": "2025-06-01", "start_time": "10:00", "spaces_remaining": "5",
             "extra_rates": {"rate": {"rate_id": "r1", "rate_price": "40"}}},
            {"start_date": "2025-06-01", "start_time": "10:00", "spaces_remaining": "9",
             "main_price": {"rate_id": "r1", "rate_price": "40"}}
        ]));

        let slots = map_availability(&doc);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].capacity, 5);
        assert!(slots[0].rates[0].price_per_booking.is_some());
    }

    #[test]
    fn test_exhausted_slots_are_dropped() {
        let doc = mapping_doc(DEPARTURES);
        let slots = map_availability(&doc);
        assert!(slots.iter().all(|s| s.capacity > 0));
        assert!(slots.iter().all(|s| s.time == Some(Time::new(10, 0))));
        assert_eq!(slots.len(), 2);
        assert_eq!(
            slots[0].rates[0].price_per_person.as_ref().unwrap().pricing_category_with_price[0]
                .price
                .currency,
            "EUR"
        );
    }

    #[test]
    fn test_unparseable_capacity_and_date_degrade() {
        let doc = departure_doc(json!([
            {"start_date": "soon", "spaces_remaining": "4", "main_price": {"rate_id": "r1"}},
            {"start_date": "2025-06-02", "spaces_remaining": "lots", "main_price": {"rate_id": "r1"}},
            {"start_date": "2025-06-03", "spaces_remaining": "2", "main_price": {"rate_id": "r1"}}
        ]));
        let slots = map_availability(&doc);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].date, DateYmd::new(2025, 6, 3));
        assert_eq!(slots[0].time, None);
    }

    #[test]
    fn test_no_rate_sources_yield_standard_rate() {
        let tour = json!({"tour_id": "48"});
        let departures = departure_doc(json!([{"start_date": "2025-06-01"}]));
        assert_eq!(discover_rates(&tour, &departures), vec![default_rate()]);
    }

    #[test]
    fn test_rate_chain_falls_back_in_order() {
        let tour = json!({"new_booking": {"people_selection": {"rate": [
            {"rate_id": "p1", "label_1": "Adult"},
            {"rate_id": "p1", "label_1": "Adult again"},
            {"rate_id": "", "label_1": "Broken"}
        ]}}});
        let no_prices =
            departure_doc(json!({"fields": {"field": {"name": "rate_id", "value": "f1"}}}));
        assert_eq!(
            discover_rates(&tour, &no_prices),
            vec![Rate { id: "p1".into(), label: "Adult".into() }]
        );

        let bare_tour = json!({});
        assert_eq!(
            discover_rates(&bare_tour, &no_prices),
            vec![Rate { id: "f1".into(), label: "f1".into() }]
        );

        let priced = mapping_doc(DEPARTURES);
        let ids: Vec<String> = discover_rates(&tour, &priced).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn test_start_times_normalized_and_sorted() {
        let doc = departure_doc(json!([
            {"start_time": "9:5"}, {"start_time": "09:05"}, {"start_time": "10:00"}
        ]));
        let times = departure_start_times(&doc);
        let shown: Vec<String> = start_times(&json!({}), &times)
            .iter()
            .map(Time::to_string)
            .collect();
        assert_eq!(shown, vec!["09:05", "10:00"]);
    }

    #[test]
    fn test_product_default_time_joins_sorted_list() {
        let times: BTreeSet<Time> = [Time::new(10, 0), Time::new(14, 30)].into_iter().collect();
        let tour = json!({"start_time": "8:30"});
        let shown: Vec<String> = start_times(&tour, &times).iter().map(Time::to_string).collect();
        assert_eq!(shown, vec!["08:30", "10:00", "14:30"]);
    }

    #[test_case(json!({}), vec![Time::new(9, 0)], BookingType::DateAndTime; "#1 departures with times")]
    #[test_case(json!({"new_booking": {"date_selection": {"date_type": "DATE_AND_TIME"}}}), vec![], BookingType::DateAndTime; "#2 explicit date type")]
    #[test_case(json!({"new_booking": {"date_selection": {"date_type": "FLEXIBLE"}}}), vec![], BookingType::Date; "#3 unknown date type")]
    #[test_case(json!({}), vec![], BookingType::Date; "#4 nothing known")]
    fn test_booking_type_inference(tour: Value, times: Vec<Time>, expected: BookingType) {
        let times: BTreeSet<Time> = times.into_iter().collect();
        assert_eq!(infer_booking_type(&tour, &times), expected);
    }

    #[test_case(true, true, MeetingType::MeetOnLocationOrPickUp; "#1 points and on request")]
    #[test_case(true, false, MeetingType::PickUp; "#2 points only")]
    #[test_case(false, true, MeetingType::MeetOnLocation; "#3 on request without points")]
    #[test_case(false, false, MeetingType::MeetOnLocation; "#4 neither")]
    fn test_meeting_type(points: bool, on_request: bool, expected: MeetingType) {
        assert_eq!(meeting_type(points, on_request), expected);
    }

    #[test_case("38.7167,-9.1420", Some((38.7167, -9.142)); "#1 valid")]
    #[test_case(" 1.5 , 2 ", Some((1.5, 2.0)); "#2 spaces")]
    #[test_case("38.70", None; "#3 one part")]
    #[test_case("1,2,3", None; "#4 three parts")]
    #[test_case("north,south", None; "#5 not numeric")]
    #[test_case("", None; "#6 empty")]
    fn test_parse_geocode(raw: &str, expected: Option<(f64, f64)>) {
        let parsed = parse_geocode(raw).map(|g| (g.latitude, g.longitude));
        assert_eq!(parsed, expected);
    }

    fn mapping_doc(raw: &str) -> Value {
        parse(raw).unwrap()
    }

    #[test]
    fn test_map_product_description() {
        let product = map_product(&mapping_doc(TOUR_SHOW), &mapping_doc(DEPARTURES)).unwrap();

        assert_eq!(product.id, "48");
        assert_eq!(product.name, "Harbour & Old Town Walk");
        assert_eq!(product.booking_type, BookingType::DateAndTime);
        let shown: Vec<String> = product.start_times.iter().map(Time::to_string).collect();
        assert_eq!(shown, vec!["08:30", "09:05", "10:00"]);

        let category_ids: Vec<&str> = product.pricing_categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(category_ids, vec!["r1", "r2"]);
        assert_eq!(product.pricing_categories[1].max_age, 17);
        assert_eq!(product.pricing_categories[0].max_age, 0);

        assert_eq!(product.meeting_type, MeetingType::MeetOnLocationOrPickUp);
        assert!(product.custom_pickup_place_allowed);
        assert_eq!(product.pickup_minutes_before, Some(15));
        assert_eq!(product.pickup_places.len(), 2);
        assert!(product.pickup_places[0].address.geo_point.is_some());
        assert!(product.pickup_places[1].address.geo_point.is_none());
        assert_eq!(product.pickup_places[0].address.city, "Lisbon");
        assert!(product.dropoff_available);
        assert_eq!(product.ticket_type, TicketType::QrCode);
        assert_eq!(product.extras[0].title, "Lunch");
        assert_eq!(product.cities, vec!["Lisbon"]);
    }

    #[test]
    fn test_map_product_without_pickup() {
        let tour = json!({"tour": {"tour_id": "9", "pickup_on_request": "1", "pickup_minutes_before": "10",
                                   "delivery_formats": {"delivery_format": "CARRIER_PIGEON"}}});
        let product = map_product(&tour, &departure_doc(Value::Null)).unwrap();
        assert_eq!(product.meeting_type, MeetingType::MeetOnLocation);
        assert!(!product.custom_pickup_place_allowed);
        assert_eq!(product.pickup_minutes_before, None);
        assert!(product.pickup_places.is_empty());
        assert!(!product.dropoff_available);
        assert_eq!(product.ticket_type, TicketType::QrCode);
        assert_eq!(product.rates, vec![default_rate()]);
        assert_eq!(product.booking_type, BookingType::Date);
        assert!(product.start_times.is_empty());
    }

    #[test]
    fn test_map_product_with_fixed_pickup_points() {
        let tour = json!({"tour": {"tour_id": "12", "location": "Porto", "country": "PT",
                                   "pickup_minutes_before": "20",
                                   "pickup_points": {"pickup": [
                                       {"pickup_name": "Ribeira", "geocode": "41.14,-8.61"},
                                       {"pickup_name": "Campanha Station"}
                                   ]}}});
        let product = map_product(&tour, &departure_doc(Value::Null)).unwrap();
        assert_eq!(product.meeting_type, MeetingType::PickUp);
        assert!(!product.custom_pickup_place_allowed);
        assert_eq!(product.pickup_minutes_before, Some(20));
        assert_eq!(product.pickup_places.len(), 2);
        assert_eq!(product.pickup_places[0].title, "Ribeira");
        assert_eq!(product.pickup_places[0].address.city, "Porto");
        assert!(product.pickup_places[0].address.geo_point.is_some());
        assert!(product.pickup_places[1].address.geo_point.is_none());
        assert!(!product.dropoff_available);
        assert!(product.dropoff_places.is_empty());
    }

    #[test]
    fn test_map_product_requires_tour() {
        let err = map_product(&json!({"error": "OK"}), &json!({})).unwrap_err();
        assert!(matches!(err, FailureKind::UpstreamRejected { .. }));
    }

    #[test]
    fn test_product_list_and_from_price() {
        let doc = json!({"tour": {"tour_id": "48", "tour_name": "Walk", "location": "Lisbon",
                                  "from_price": "40.00", "from_price_display": "From EUR 40"}});
        let list = map_product_list(&doc);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].countries, Vec::<String>::new());
        let category = from_price_category(&doc, "48");
        assert_eq!(category.id, "48_40.00");
        assert_eq!(category.label, "From EUR 40");
    }

    #[test]
    fn test_minimum_open_capacity() {
        let doc = json!({"dates_and_prices": {"date": [
            {"status": "OPEN", "spaces_remaining": "6"},
            {"status": "OPEN", "spaces_remaining": "3"},
            {"status": "CLOSED", "spaces_remaining": "1"},
            {"status": "OPEN", "spaces_remaining": "unlimited"}
        ]}});
        assert_eq!(minimum_open_capacity(&doc), 3);
        assert_eq!(minimum_open_capacity(&json!({})), 0);
    }

    fn component(key: &str, time: Option<Time>, tag: Option<&str>) -> AvailableComponent {
        AvailableComponent {
            component_key: key.to_string(),
            start_date: None,
            start_time: time,
            rate_tag: tag.map(str::to_string),
            total_price: String::new(),
            currency: String::new(),
        }
    }

    #[test]
    fn test_select_component() {
        let components = vec![
            component("A", Some(Time::new(9, 0)), Some("r2")),
            component("B", Some(Time::new(10, 0)), Some("r1")),
            component("C", Some(Time::new(10, 0)), Some("r2")),
        ];
        let pick = |time, rate| select_component(&components, time, rate).map(|c| c.component_key.clone());
        assert_eq!(pick(Some(Time::new(10, 0)), "r2"), Some("C".to_string()));
        assert_eq!(pick(Some(Time::new(10, 0)), "r9"), Some("B".to_string()));
        assert_eq!(pick(None, "r1"), Some("B".to_string()));
        assert_eq!(pick(Some(Time::new(11, 0)), "r1"), None);
        assert!(select_component(&[], None, "r1").is_none());
    }

    #[test]
    fn test_available_components_rate_tag_sources() {
        let doc = json!({"available_components": {"component": [
            {"component_key": "K1", "start_time": "10:00", "rate_id": "r1"},
            {"component_key": "K2", "fields": {"field": [{"name": "rate_id", "value": "r2"}]}},
            {"component_key": "K3", "date_code": "DC"},
            {"note": "no key"}
        ]}});
        let components = available_components(&doc);
        let tags: Vec<Option<String>> = components.iter().map(|c| c.rate_tag.clone()).collect();
        assert_eq!(tags, vec![Some("r1".into()), Some("r2".into()), Some("DC".into())]);
    }

    #[test]
    fn test_map_commit() {
        let doc = json!({"booking": {
            "booking_id": "9001", "channel_id": "3930", "status": "2", "status_text": "Confirmed",
            "voucher_url": "https://vouchers.example/9001", "barcode_data": "QR9001",
            "components": {"component": {"component_name": "Walk", "start_date": "2025-06-01",
                "urls": {"url": {"label": "Map", "link": "https://maps.example"}}}}
        }});
        let commit = map_commit(&doc).unwrap();
        assert_eq!(commit.booking_id, "9001");
        assert_eq!(commit.barcode_data.as_deref(), Some("QR9001"));
        assert_eq!(commit.components[0].links[0].label, "Map");

        let err = map_commit(&json!({"booking": {}})).unwrap_err();
        assert!(matches!(err, FailureKind::UpstreamRejected { status: 200, .. }));
    }
}
