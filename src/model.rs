// Canonical records exchanged with the marketplace plugin contract
use crate::config::PluginParameter;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DateYmd {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl DateYmd {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
        Some(Self::from(date))
    }
}

impl From<NaiveDate> for DateYmd {
    fn from(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month(), date.day())
    }
}

impl fmt::Display for DateYmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time {
    pub hour: u32,
    pub minute: u32,
}

impl Time {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    // Accepts `H:M`, `HH:MM` and `HH:MM:SS`; anything else is not a time.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().split(':');
        let hour: u32 = parts.next()?.trim().parse().ok()?;
        let minute: u32 = parts.next()?.trim().parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self { hour, minute })
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatePeriod {
    pub from: DateYmd,
    pub to: DateYmd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingType {
    Date,
    DateAndTime,
}

impl FromStr for BookingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DATE" => Ok(BookingType::Date),
            "DATE_AND_TIME" => Ok(BookingType::DateAndTime),
            other => Err(format!("unknown booking type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingType {
    MeetOnLocation,
    PickUp,
    MeetOnLocationOrPickUp,
}

impl MeetingType {
    pub fn offers_pickup(&self) -> bool {
        matches!(self, MeetingType::PickUp | MeetingType::MeetOnLocationOrPickUp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketType {
    QrCode,
    Barcode,
    Text,
}

impl FromStr for TicketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QR_CODE" => Ok(TicketType::QrCode),
            "BARCODE" => Ok(TicketType::Barcode),
            "TEXT" => Ok(TicketType::Text),
            other => Err(format!("unknown ticket type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductCategory {
    Activities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketSupport {
    TicketPerPerson,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingCategory {
    pub id: String,
    pub label: String,
    pub min_age: u32,
    pub max_age: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rate {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Price {
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingCategoryWithPrice {
    pub pricing_category_id: String,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePerPerson {
    pub pricing_category_with_price: Vec<PricingCategoryWithPrice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePerBooking {
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWithPrice {
    pub rate_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_person: Option<PricePerPerson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_booking: Option<PricePerBooking>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub date: DateYmd,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Time>,
    pub capacity: u32,
    pub rates: Vec<RateWithPrice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub address_line1: String,
    pub address_line2: String,
    pub postal_code: String,
    pub city: String,
    pub country_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_point: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PickupDropoffPlace {
    pub title: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extra {
    pub id: String,
    pub title: String,
    pub description: String,
    pub optional: bool,
    pub max_per_booking: u32,
    pub limit_by_pax: bool,
    pub increases_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicProductInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub pricing_categories: Vec<PricingCategory>,
    pub cities: Vec<String>,
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDescription {
    pub id: String,
    pub name: String,
    pub description: String,
    pub pricing_categories: Vec<PricingCategory>,
    pub rates: Vec<Rate>,
    pub booking_type: BookingType,
    pub dropoff_available: bool,
    pub dropoff_places: Vec<PickupDropoffPlace>,
    pub custom_dropoff_place_allowed: bool,
    pub product_category: ProductCategory,
    pub ticket_support: Vec<TicketSupport>,
    pub countries: Vec<String>,
    pub cities: Vec<String>,
    pub start_times: Vec<Time>,
    pub ticket_type: TicketType,
    pub meeting_type: MeetingType,
    pub custom_pickup_place_allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_minutes_before: Option<u32>,
    pub pickup_places: Vec<PickupDropoffPlace>,
    pub extras: Vec<Extra>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomerContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

impl CustomerContact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Passenger {
    pub pricing_category_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reservation {
    pub external_product_id: String,
    pub date: DateYmd,
    pub time: Option<Time>,
    pub external_rate_id: String,
    pub passengers: Vec<Passenger>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReservationData {
    pub customer_contact: CustomerContact,
    pub reservations: Vec<Reservation>,
    pub notes: Option<String>,
    pub platform_id: Option<String>,
}

// Outcome detail carried by every failed branch
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<String>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure_kind: None,
        }
    }
}

impl From<&crate::error::FailureKind> for Failure {
    fn from(kind: &crate::error::FailureKind) -> Self {
        Self {
            message: kind.to_string(),
            failure_kind: Some(kind.label().to_string()),
        }
    }
}

// Read operations

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchProductRequest {
    pub parameters: Vec<PluginParameter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetProductByIdRequest {
    pub parameters: Vec<PluginParameter>,
    pub external_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductsAvailabilityRequest {
    pub parameters: Vec<PluginParameter>,
    pub external_product_ids: Vec<String>,
    pub range: DatePeriod,
    pub required_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductsAvailabilityResponse {
    pub product_id: String,
    pub actual_check_done: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductAvailabilityRequest {
    pub parameters: Vec<PluginParameter>,
    pub product_id: String,
    pub range: DatePeriod,
}

// Write operations

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReservationRequest {
    pub parameters: Vec<PluginParameter>,
    pub reservation_data: ReservationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessfulReservation {
    pub reservation_confirmation_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_reservation: Option<SuccessfulReservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reservation: Option<Failure>,
}

impl ReservationResponse {
    // Empty when the reservation did not go through
    pub fn confirmation_code(&self) -> &str {
        self.successful_reservation
            .as_ref()
            .map(|r| r.reservation_confirmation_code.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CancelReservationRequest {
    pub parameters: Vec<PluginParameter>,
    pub reservation_confirmation_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReservationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_reservation_cancellation: Option<Acknowledged>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reservation_cancellation: Option<Failure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Acknowledged {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrTicket {
    pub ticket_barcode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub qr_ticket: QrTicket,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessfulBooking {
    pub booking_confirmation_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_ticket: Option<Ticket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voucher_url: Option<String>,
    // Side channels are best effort; these flags report how far they got.
    pub confirmation_email_sent: bool,
    pub notification_dispatched: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfirmBookingRequest {
    pub parameters: Vec<PluginParameter>,
    pub reservation_confirmation_code: String,
    pub reservation_data: ReservationData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateConfirmBookingRequest {
    pub parameters: Vec<PluginParameter>,
    pub reservation_data: ReservationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBookingResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_booking: Option<SuccessfulBooking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_booking: Option<Failure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CancelBookingRequest {
    pub parameters: Vec<PluginParameter>,
    pub booking_confirmation_code: String,
    pub reason_code: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_cancellation: Option<Acknowledged>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_cancellation: Option<Failure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AmendBookingRequest {
    pub parameters: Vec<PluginParameter>,
    pub booking_confirmation_code: String,
    pub reservation_data: ReservationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessfulAmendment {
    pub amendment_confirmation_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmendBookingResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_amendment: Option<SuccessfulAmendment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_amendment: Option<Failure>,
}
