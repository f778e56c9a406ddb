// Typed endpoint family of the tour-operator API and the marketplace REST surface
use crate::client::{UpstreamRequest, UpstreamTransport};
use crate::document;
use crate::error::FailureKind;
use crate::model::{DatePeriod, DateYmd};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TOUR_SEARCH: &str = "/c/tours/search.xml";
pub const TOUR_SHOW: &str = "/c/tour/show.xml";
pub const TOUR_DEPARTURES: &str = "/c/tour/datesprices/dep/show.xml";
pub const TOUR_DATES_AND_DEALS: &str = "/c/tour/datesprices/datesndeals/search.xml";
pub const TOUR_CHECK_AVAILABILITY: &str = "/c/tour/datesprices/checkavail.xml";
pub const BOOKING_START: &str = "/c/booking/new/start.xml";
pub const BOOKING_DELETE: &str = "/c/booking/delete.xml";
pub const BOOKING_COMMIT: &str = "/c/booking/new/commit.xml";
pub const BOOKING_CANCEL: &str = "/c/booking/cancel.xml";

pub const SEARCH_PAGE_SIZE: u32 = 200;
pub const DEPARTURES_PAGE_SIZE: u32 = 30;

// Request bodies

#[derive(Debug, PartialEq, Default, Clone, Serialize)]
#[serde(rename = "booking")]
pub struct BookingXml {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_customers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_email: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentsXml>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customers: Option<CustomersXml>,
}

#[derive(Debug, PartialEq, Default, Clone, Serialize)]
pub struct ComponentsXml {
    #[serde(rename = "component")]
    pub components: Vec<ComponentXml>,
}

#[derive(Debug, PartialEq, Default, Clone, Serialize)]
pub struct ComponentXml {
    pub component_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, PartialEq, Default, Clone, Serialize)]
pub struct CustomersXml {
    #[serde(rename = "customer")]
    pub customers: Vec<CustomerXml>,
}

#[derive(Debug, PartialEq, Default, Clone, Serialize)]
pub struct CustomerXml {
    pub firstname: String,
    pub surname: String,
    pub email: String,
    pub tel_home: String,
}

impl BookingXml {
    pub fn to_xml(&self) -> Result<String, FailureKind> {
        quick_xml::se::to_string(self)
            .map_err(|e| FailureKind::ConfigurationError(format!("booking body: {e}")))
    }
}

pub struct TourCmsApi {
    transport: Arc<dyn UpstreamTransport>,
}

impl TourCmsApi {
    pub fn new(transport: Arc<dyn UpstreamTransport>) -> Self {
        Self { transport }
    }

    async fn fetch(&self, request: UpstreamRequest) -> Result<Value, FailureKind> {
        let raw = self.transport.call(request).await?;
        document::parse_ok(&raw)
    }

    pub async fn search_tours(&self, filter_ids: &[String]) -> Result<Value, FailureKind> {
        let mut request = UpstreamRequest::get(TOUR_SEARCH).param("per_page", SEARCH_PAGE_SIZE);
        if !filter_ids.is_empty() {
            request = request.param("tour_id", filter_ids.join(","));
        }
        self.fetch(request).await
    }

    pub async fn show_tour(&self, tour_id: &str) -> Result<Value, FailureKind> {
        self.fetch(
            UpstreamRequest::get(TOUR_SHOW)
                .param("id", tour_id)
                .param("show_options", 1),
        )
        .await
    }

    pub async fn tour_departures(
        &self,
        tour_id: &str,
        range: Option<&DatePeriod>,
    ) -> Result<Value, FailureKind> {
        let mut request = UpstreamRequest::get(TOUR_DEPARTURES).param("id", tour_id);
        match range {
            Some(range) => {
                request = request
                    .param("start_date_start", range.from)
                    .param("start_date_end", range.to);
            }
            None => request = request.param("per_page", DEPARTURES_PAGE_SIZE),
        }
        self.fetch(request).await
    }

    pub async fn dates_and_deals(
        &self,
        tour_id: &str,
        range: &DatePeriod,
    ) -> Result<Value, FailureKind> {
        self.fetch(
            UpstreamRequest::get(TOUR_DATES_AND_DEALS)
                .param("id", tour_id)
                .param("distinct_start_dates", 1)
                .param("startdate_start", range.from)
                .param("startdate_end", range.to),
        )
        .await
    }

    // One query parameter per pricing category, valued with its passenger count
    pub async fn check_availability(
        &self,
        tour_id: &str,
        date: DateYmd,
        passengers: &BTreeMap<String, u32>,
    ) -> Result<Value, FailureKind> {
        let mut request = UpstreamRequest::get(TOUR_CHECK_AVAILABILITY)
            .param("id", tour_id)
            .param("date", date);
        for (category, count) in passengers {
            request = request.param(category.clone(), count);
        }
        self.fetch(request).await
    }

    pub async fn start_booking(&self, booking: &BookingXml) -> Result<Value, FailureKind> {
        self.fetch(UpstreamRequest::post(BOOKING_START).body(booking.to_xml()?))
            .await
    }

    pub async fn delete_temporary_booking(&self, booking_id: &str) -> Result<Value, FailureKind> {
        self.fetch(UpstreamRequest::post(BOOKING_DELETE).param("booking_id", booking_id))
            .await
    }

    // The adapter sends its own confirmation, so the upstream customer email stays off.
    pub async fn commit_booking(&self, booking_id: &str) -> Result<Value, FailureKind> {
        let body = BookingXml {
            booking_id: Some(booking_id.to_string()),
            suppress_email: Some(1),
            ..Default::default()
        };
        self.fetch(UpstreamRequest::post(BOOKING_COMMIT).body(body.to_xml()?))
            .await
    }

    pub async fn cancel_booking(
        &self,
        booking_id: &str,
        note: &str,
        reason: &str,
    ) -> Result<Value, FailureKind> {
        let body = BookingXml {
            booking_id: Some(booking_id.to_string()),
            note: Some(note.to_string()),
            cancel_reason: Some(reason.to_string()),
            ..Default::default()
        };
        self.fetch(UpstreamRequest::post(BOOKING_CANCEL).body(body.to_xml()?))
            .await
    }
}

// Marketplace REST surface, signed with the access-key scheme
pub struct MarketplaceApi {
    transport: Arc<dyn UpstreamTransport>,
}

impl MarketplaceApi {
    pub fn new(transport: Arc<dyn UpstreamTransport>) -> Self {
        Self { transport }
    }

    pub async fn booking_exists(&self, booking_id: &str) -> Result<bool, FailureKind> {
        let raw = self
            .transport
            .call(UpstreamRequest::get(format!("/activity.json/booking/{booking_id}")))
            .await?;
        let doc = document::parse(&raw)?;
        Ok(document::text(document::at(&doc, &["id"])).is_some())
    }
}
