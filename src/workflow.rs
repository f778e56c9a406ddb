// Booking lifecycle: availability check, temporary booking, commit and cancellation
use crate::email::{ConfirmationDetails, ConfirmationMailer};
use crate::error::{FailureKind, TransitionError};
use crate::mapping::{self, CommitResult};
use crate::messages::{BookingCancelMessage, BookingSuccessMessage, AGENT_CANCEL_REASON};
use crate::model::{
    CustomerContact, Failure, Passenger, QrTicket, Reservation, ReservationData, SuccessfulBooking,
    Ticket,
};
use crate::notify::NotificationDispatcher;
use crate::upstream::{BookingXml, ComponentXml, ComponentsXml, CustomerXml, CustomersXml, TourCmsApi};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_CANCEL_NOTE: &str = "Cancelled via marketplace";
pub const AMENDMENT_UNSUPPORTED: &str = "Booking amendment is not supported by the upstream system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    Requested,
    AvailabilityConfirmed,
    Reserved,
    Confirmed,
    Cancelled,
    Failed,
}

impl BookingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::Requested => "REQUESTED",
            BookingState::AvailabilityConfirmed => "AVAILABILITY_CONFIRMED",
            BookingState::Reserved => "RESERVED",
            BookingState::Confirmed => "CONFIRMED",
            BookingState::Cancelled => "CANCELLED",
            BookingState::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(self, next: BookingState) -> bool {
        use BookingState::*;
        matches!(
            (self, next),
            (Requested, AvailabilityConfirmed)
                | (AvailabilityConfirmed, Reserved)
                | (Reserved, Confirmed)
                | (Reserved, Cancelled)
                | (Confirmed, Cancelled)
        ) || (next == Failed && self != Failed)
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRecord {
    pub confirmation_code: String,
    pub state: BookingState,
    pub customer: CustomerContact,
    pub component_key: Option<String>,
    pub passengers: BTreeMap<String, u32>,
}

impl BookingRecord {
    pub fn requested(customer: CustomerContact, passengers: BTreeMap<String, u32>) -> Self {
        Self {
            confirmation_code: String::new(),
            state: BookingState::Requested,
            customer,
            component_key: None,
            passengers,
        }
    }

    // Nothing is persisted between calls, so later steps rebuild the record from the code they are given.
    pub fn resume(code: &str, state: BookingState, customer: CustomerContact) -> Self {
        Self {
            confirmation_code: code.to_string(),
            state,
            customer,
            component_key: None,
            passengers: BTreeMap::new(),
        }
    }

    pub fn transition(&mut self, next: BookingState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(code = %self.confirmation_code, from = %self.state, to = %next, "booking transition");
        self.state = next;
        Ok(())
    }

    pub fn total_passengers(&self) -> u32 {
        self.passengers.values().sum()
    }
}

pub fn passenger_counts(passengers: &[Passenger]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for passenger in passengers {
        *counts.entry(passenger.pricing_category_id.clone()).or_insert(0) += 1;
    }
    counts
}

fn customer_xml(contact: &CustomerContact) -> CustomerXml {
    CustomerXml {
        firstname: contact.first_name.clone(),
        surname: contact.last_name.clone(),
        email: contact.email.clone(),
        tel_home: contact.phone.clone(),
    }
}

pub fn confirmation_details(commit: &CommitResult, customer: &CustomerContact) -> ConfirmationDetails {
    let first = commit.components.first();
    ConfirmationDetails {
        customer_name: customer.full_name(),
        recipient: customer.email.clone(),
        booking_id: commit.booking_id.clone(),
        booking_date: first.map(|c| c.start_date.clone()).unwrap_or_default(),
        start_time: first.map(|c| c.start_time.clone()).unwrap_or_default(),
        voucher_link: commit.voucher_url.clone().unwrap_or_default(),
        lines: commit
            .components
            .iter()
            .map(|c| {
                format!("{} - {} {} x{}", c.component_name, c.start_date, c.start_time, c.sale_quantity)
            })
            .collect(),
        ticket_codes: commit.barcode_data.iter().cloned().collect(),
    }
}

fn fail(record: &mut BookingRecord, err: FailureKind) -> FailureKind {
    let from = record.state;
    if record.transition(BookingState::Failed).is_ok() {
        warn!(
            code = %record.confirmation_code,
            %from,
            kind = err.label(),
            error = %err,
            "booking failed"
        );
    }
    err
}

/// A reservation that stopped short of RESERVED, with the record in its terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationFailure {
    pub record: BookingRecord,
    pub error: FailureKind,
}

impl From<ReservationFailure> for FailureKind {
    fn from(failure: ReservationFailure) -> Self {
        failure.error
    }
}

pub struct BookingWorkflow {
    api: TourCmsApi,
    notifier: Arc<NotificationDispatcher>,
    mailer: Option<ConfirmationMailer>,
}

impl BookingWorkflow {
    pub fn new(api: TourCmsApi, notifier: Arc<NotificationDispatcher>, mailer: Option<ConfirmationMailer>) -> Self {
        Self {
            api,
            notifier,
            mailer,
        }
    }

    /// REQUESTED through RESERVED. The returned record carries the reservation confirmation code.
    pub async fn reserve(&self, data: &ReservationData) -> Result<BookingRecord, ReservationFailure> {
        let reservation = data.reservations.first();
        let mut record = BookingRecord::requested(
            data.customer_contact.clone(),
            reservation.map(|r| passenger_counts(&r.passengers)).unwrap_or_default(),
        );
        let outcome = match reservation {
            None => Err(FailureKind::ConfigurationError(
                "reservation data carries no reservation".to_string(),
            )),
            Some(r) if r.external_product_id.trim().is_empty() => {
                Err(FailureKind::ConfigurationError("product id is empty".to_string()))
            }
            Some(r) => self.hold_component(&mut record, r, data).await,
        };
        match outcome {
            Ok(()) => Ok(record),
            Err(err) => {
                let error = fail(&mut record, err);
                Err(ReservationFailure { record, error })
            }
        }
    }

    async fn hold_component(
        &self,
        record: &mut BookingRecord,
        reservation: &Reservation,
        data: &ReservationData,
    ) -> Result<(), FailureKind> {
        let check = self
            .api
            .check_availability(&reservation.external_product_id, reservation.date, &record.passengers)
            .await?;
        let components = mapping::available_components(&check);
        let component = mapping::select_component(&components, reservation.time, &reservation.external_rate_id)
            .ok_or_else(|| FailureKind::rejected(200, "no available component for the requested date and time"))?;
        record.component_key = Some(component.component_key.clone());
        record.transition(BookingState::AvailabilityConfirmed)?;

        let booking = BookingXml {
            total_customers: Some(record.total_passengers()),
            components: Some(ComponentsXml {
                components: vec![ComponentXml {
                    component_key: component.component_key.clone(),
                    note: data.notes.clone(),
                }],
            }),
            customers: Some(CustomersXml {
                customers: vec![customer_xml(&data.customer_contact)],
            }),
            ..Default::default()
        };
        let doc = self.api.start_booking(&booking).await?;
        record.confirmation_code = mapping::booking_id(&doc)
            .ok_or_else(|| FailureKind::rejected(200, "temporary booking carries no booking id"))?;
        record.transition(BookingState::Reserved)?;

        info!(
            code = %record.confirmation_code,
            product = %reservation.external_product_id,
            component = %component.component_key,
            "reservation held"
        );
        Ok(())
    }

    /// RESERVED to CONFIRMED. Email and notifications are best effort and reported as flags.
    pub async fn confirm(&self, code: &str, data: &ReservationData) -> Result<SuccessfulBooking, FailureKind> {
        if code.trim().is_empty() {
            return Err(FailureKind::ConfigurationError("reservation confirmation code is empty".to_string()));
        }
        let mut record = BookingRecord::resume(code, BookingState::Reserved, data.customer_contact.clone());

        let commit = match self.commit(code).await {
            Ok(commit) => commit,
            Err(err) => return Err(fail(&mut record, err)),
        };
        record.transition(BookingState::Confirmed)?;
        info!(code = %commit.booking_id, "booking confirmed");

        let confirmation_email_sent = self.send_confirmation(&commit, &data.customer_contact).await;
        let message = BookingSuccessMessage::new(&commit, &data.customer_contact, data.platform_id.as_deref());
        let notification_dispatched = self.notifier.booking_confirmed(message).is_some();

        Ok(SuccessfulBooking {
            booking_confirmation_code: commit.booking_id.clone(),
            booking_ticket: commit.barcode_data.clone().map(|code| Ticket {
                qr_ticket: QrTicket { ticket_barcode: code },
            }),
            voucher_url: commit.voucher_url.clone(),
            confirmation_email_sent,
            notification_dispatched,
        })
    }

    async fn commit(&self, code: &str) -> Result<CommitResult, FailureKind> {
        let doc = self.api.commit_booking(code).await?;
        mapping::map_commit(&doc)
    }

    async fn send_confirmation(&self, commit: &CommitResult, customer: &CustomerContact) -> bool {
        let Some(mailer) = &self.mailer else {
            info!(code = %commit.booking_id, "mail transport not configured, confirmation email skipped");
            return false;
        };
        match mailer.send_confirmation(&confirmation_details(commit, customer)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(code = %commit.booking_id, error = %e, "confirmation email failed");
                false
            }
        }
    }

    pub async fn create_and_confirm(&self, data: &ReservationData) -> Result<SuccessfulBooking, FailureKind> {
        let record = self.reserve(data).await?;
        self.confirm(&record.confirmation_code, data).await
    }

    /// RESERVED to CANCELLED: the temporary booking is released.
    pub async fn cancel_reservation(&self, code: &str) -> Result<(), FailureKind> {
        if code.trim().is_empty() {
            return Err(FailureKind::ConfigurationError("reservation confirmation code is empty".to_string()));
        }
        let mut record = BookingRecord::resume(code, BookingState::Reserved, CustomerContact::default());
        if let Err(err) = self.api.delete_temporary_booking(code).await {
            return Err(fail(&mut record, err));
        }
        record.transition(BookingState::Cancelled)?;
        info!(code, "reservation released");
        Ok(())
    }

    /// CONFIRMED to CANCELLED, followed by the cancellation notice.
    pub async fn cancel_booking(
        &self,
        code: &str,
        reason: Option<&str>,
        note: Option<&str>,
    ) -> Result<(), FailureKind> {
        if code.trim().is_empty() {
            return Err(FailureKind::ConfigurationError("booking confirmation code is empty".to_string()));
        }
        let reason = reason.filter(|r| !r.trim().is_empty()).unwrap_or(AGENT_CANCEL_REASON);
        let note = note.filter(|n| !n.trim().is_empty()).unwrap_or(DEFAULT_CANCEL_NOTE);

        let mut record = BookingRecord::resume(code, BookingState::Confirmed, CustomerContact::default());
        if let Err(err) = self.api.cancel_booking(code, note, reason).await {
            return Err(fail(&mut record, err));
        }
        record.transition(BookingState::Cancelled)?;
        info!(code, reason, "booking cancelled");

        self.notifier.booking_cancelled(BookingCancelMessage {
            booking_id: code.to_string(),
            note: note.to_string(),
            reason_code: reason.to_string(),
        });
        Ok(())
    }

    // There is no amendment call upstream; report that rather than pretend.
    pub fn amend(&self, code: &str) -> Failure {
        warn!(code, "amendment requested but not supported");
        Failure {
            message: AMENDMENT_UNSUPPORTED.to_string(),
            failure_kind: Some("unsupported".to_string()),
        }
    }
}
