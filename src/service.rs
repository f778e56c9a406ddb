// The plugin-facing operations: each resolves its configuration, talks to the
// upstream and answers with a structured success or failure, never a bare error.
use crate::client::{build_http_client, SignedRequestClient, UpstreamTransport};
use crate::config::{
    AdapterConfig, Credentials, MarketplaceCredentials, NotifierConfig, PluginParameter, SmtpSettings,
    UpstreamConfig,
};
use crate::document::at;
use crate::email::{ConfirmationMailer, EmailTransport, RemoteBarcodeImage, SmtpMailer, TicketImageGenerator};
use crate::error::FailureKind;
use crate::mapping;
use crate::model::{
    Acknowledged, AmendBookingRequest, AmendBookingResponse, AvailabilitySlot, BasicProductInfo,
    CancelBookingRequest, CancelBookingResponse, CancelReservationRequest, CancelReservationResponse,
    ConfirmBookingRequest, ConfirmBookingResponse, CreateConfirmBookingRequest, DatePeriod, Failure,
    GetProductByIdRequest, ProductAvailabilityRequest, ProductDescription, ProductsAvailabilityRequest,
    ProductsAvailabilityResponse, ReservationRequest, ReservationResponse, SearchProductRequest,
    SuccessfulBooking, SuccessfulReservation,
};
use crate::notify::NotificationDispatcher;
use crate::signing::{AccessKeySigner, ChannelSigner};
use crate::upstream::{MarketplaceApi, TourCmsApi};
use crate::workflow::BookingWorkflow;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

// Upper bound on upstream calls a single operation keeps in flight
pub const UPSTREAM_FAN_OUT: usize = 8;

/// Builds the per-request collaborators from resolved configuration.
pub trait Connector: Send + Sync + 'static {
    fn upstream(&self, credentials: &Credentials) -> Arc<dyn UpstreamTransport>;

    fn mail_transport(&self, smtp: &SmtpSettings) -> Option<Arc<dyn EmailTransport>>;
}

// Shares one pooled HTTP client across every request
pub struct HttpConnector {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl HttpConnector {
    pub fn new(config: UpstreamConfig) -> Result<Self, FailureKind> {
        let http = build_http_client(&config)?;
        Ok(Self { http, config })
    }

    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }

    pub fn marketplace_api(&self, credentials: MarketplaceCredentials) -> MarketplaceApi {
        MarketplaceApi::new(Arc::new(SignedRequestClient::new(
            self.http.clone(),
            self.config.marketplace_url.clone(),
            AccessKeySigner::new(credentials),
        )))
    }
}

impl Connector for HttpConnector {
    fn upstream(&self, credentials: &Credentials) -> Arc<dyn UpstreamTransport> {
        Arc::new(SignedRequestClient::new(
            self.http.clone(),
            self.config.base_url.clone(),
            ChannelSigner::new(credentials.clone()),
        ))
    }

    fn mail_transport(&self, smtp: &SmtpSettings) -> Option<Arc<dyn EmailTransport>> {
        if !smtp.is_configured() {
            return None;
        }
        match SmtpMailer::from_settings(smtp) {
            Ok(mailer) => Some(Arc::new(mailer)),
            Err(e) => {
                warn!(error = %e, "SMTP settings unusable, confirmation emails disabled");
                None
            }
        }
    }
}

fn failure(operation: &'static str, err: &FailureKind) -> Failure {
    warn!(operation, kind = err.label(), error = %err, "operation failed");
    Failure::from(err)
}

pub struct InventoryService<C: Connector> {
    connector: C,
    notifier: Arc<NotificationDispatcher>,
    ticket_images: Option<Arc<dyn TicketImageGenerator>>,
    fallback_images: Arc<dyn TicketImageGenerator>,
    env: EnvLookup,
}

impl InventoryService<HttpConnector> {
    /// Production wiring: real HTTP, SMTP and notification channels configured from the environment.
    pub fn from_env(upstream: UpstreamConfig) -> Result<Self, FailureKind> {
        let connector = HttpConnector::new(upstream)?;
        let http = connector.http();
        let notifier = NotificationDispatcher::from_config(http.clone(), &NotifierConfig::from_env());
        Ok(Self::new(
            connector,
            Arc::new(notifier),
            Arc::new(RemoteBarcodeImage::new(http)),
        ))
    }
}

impl<C: Connector> InventoryService<C> {
    pub fn new(
        connector: C,
        notifier: Arc<NotificationDispatcher>,
        fallback_images: Arc<dyn TicketImageGenerator>,
    ) -> Self {
        Self {
            connector,
            notifier,
            ticket_images: None,
            fallback_images,
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn with_ticket_images(mut self, images: Arc<dyn TicketImageGenerator>) -> Self {
        self.ticket_images = Some(images);
        self
    }

    pub fn notifier(&self) -> &Arc<NotificationDispatcher> {
        &self.notifier
    }

    fn config(&self, parameters: &[PluginParameter]) -> Result<AdapterConfig, FailureKind> {
        AdapterConfig::resolve(parameters, |name| (self.env)(name))
    }

    fn api(&self, config: &AdapterConfig) -> TourCmsApi {
        TourCmsApi::new(self.connector.upstream(&config.credentials))
    }

    fn workflow(&self, config: &AdapterConfig) -> BookingWorkflow {
        let mailer = self.connector.mail_transport(&config.smtp).map(|transport| {
            ConfirmationMailer::new(
                transport,
                self.ticket_images.clone(),
                self.fallback_images.clone(),
                config.smtp.cc.clone(),
            )
        });
        BookingWorkflow::new(self.api(config), self.notifier.clone(), mailer)
    }

    pub async fn search_products(&self, request: &SearchProductRequest) -> Vec<BasicProductInfo> {
        let config = match self.config(&request.parameters) {
            Ok(config) => config,
            Err(e) => {
                failure("search_products", &e);
                return Vec::new();
            }
        };
        let api = self.api(&config);
        let doc = match api.search_tours(&config.filter_ids).await {
            Ok(doc) => doc,
            Err(e) => {
                failure("search_products", &e);
                return Vec::new();
            }
        };

        let mut products = mapping::map_product_list(&doc);
        products.retain(|p| config.allows_product(&p.id));

        let departures: Vec<_> = stream::iter(products.iter().map(|p| api.tour_departures(&p.id, None)))
            .buffered(UPSTREAM_FAN_OUT)
            .collect()
            .await;
        for (product, result) in products.iter_mut().zip(departures) {
            product.pricing_categories = match result {
                Ok(dep) => mapping::pricing_categories(at(&dep, &["tour"]), &dep),
                Err(e) => {
                    warn!(product = %product.id, error = %e, "departures unavailable, using from price");
                    vec![mapping::from_price_category(&doc, &product.id)]
                }
            };
        }
        info!(count = products.len(), "products listed");
        products
    }

    pub async fn get_product_by_id(
        &self,
        request: &GetProductByIdRequest,
    ) -> Result<ProductDescription, FailureKind> {
        let id = request.external_id.trim();
        if id.is_empty() {
            return Err(FailureKind::ConfigurationError("product id is empty".to_string()));
        }
        let config = self.config(&request.parameters)?;
        let api = self.api(&config);

        let (show, departures) = tokio::join!(api.show_tour(id), api.tour_departures(id, None));
        let show = show?;
        let departures = departures.unwrap_or_else(|e| {
            warn!(product = id, error = %e, "departures unavailable, describing without them");
            Value::Null
        });
        mapping::map_product(&show, &departures)
    }

    async fn check_product(
        &self,
        api: &TourCmsApi,
        config: &AdapterConfig,
        product_id: &str,
        range: &DatePeriod,
        required: u32,
    ) -> ProductsAvailabilityResponse {
        let actual_check_done = if !config.allows_product(product_id) {
            debug!(product = product_id, "product outside channel filter");
            false
        } else {
            match api.dates_and_deals(product_id, range).await {
                Ok(doc) => u64::from(required) <= mapping::minimum_open_capacity(&doc),
                Err(e) => {
                    warn!(product = product_id, error = %e, "availability lookup failed");
                    false
                }
            }
        };
        ProductsAvailabilityResponse {
            product_id: product_id.to_string(),
            actual_check_done,
        }
    }

    pub async fn get_available_products(
        &self,
        request: &ProductsAvailabilityRequest,
    ) -> Vec<ProductsAvailabilityResponse> {
        let config = match self.config(&request.parameters) {
            Ok(config) => config,
            Err(e) => {
                failure("get_available_products", &e);
                return request
                    .external_product_ids
                    .iter()
                    .map(|id| ProductsAvailabilityResponse {
                        product_id: id.clone(),
                        actual_check_done: false,
                    })
                    .collect();
            }
        };
        let api = self.api(&config);
        let checks = request.external_product_ids.iter().map(|id| {
            self.check_product(&api, &config, id, &request.range, request.required_capacity)
        });
        stream::iter(checks).buffered(UPSTREAM_FAN_OUT).collect().await
    }

    pub async fn get_product_availability(
        &self,
        request: &ProductAvailabilityRequest,
    ) -> Vec<AvailabilitySlot> {
        if request.product_id.trim().is_empty() {
            failure(
                "get_product_availability",
                &FailureKind::ConfigurationError("product id is empty".to_string()),
            );
            return Vec::new();
        }
        let config = match self.config(&request.parameters) {
            Ok(config) => config,
            Err(e) => {
                failure("get_product_availability", &e);
                return Vec::new();
            }
        };
        match self
            .api(&config)
            .tour_departures(&request.product_id, Some(&request.range))
            .await
        {
            Ok(doc) => mapping::map_availability(&doc),
            Err(e) => {
                failure("get_product_availability", &e);
                Vec::new()
            }
        }
    }

    pub async fn create_reservation(&self, request: &ReservationRequest) -> ReservationResponse {
        let outcome = match self.config(&request.parameters) {
            Ok(config) => self
                .workflow(&config)
                .reserve(&request.reservation_data)
                .await
                .map_err(FailureKind::from),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(record) => ReservationResponse {
                successful_reservation: Some(SuccessfulReservation {
                    reservation_confirmation_code: record.confirmation_code,
                }),
                failed_reservation: None,
            },
            Err(e) => ReservationResponse {
                successful_reservation: None,
                failed_reservation: Some(failure("create_reservation", &e)),
            },
        }
    }

    pub async fn cancel_reservation(&self, request: &CancelReservationRequest) -> CancelReservationResponse {
        let outcome = match self.config(&request.parameters) {
            Ok(config) => {
                self.workflow(&config)
                    .cancel_reservation(&request.reservation_confirmation_code)
                    .await
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => CancelReservationResponse {
                successful_reservation_cancellation: Some(Acknowledged {}),
                failed_reservation_cancellation: None,
            },
            Err(e) => CancelReservationResponse {
                successful_reservation_cancellation: None,
                failed_reservation_cancellation: Some(failure("cancel_reservation", &e)),
            },
        }
    }

    pub async fn confirm_booking(&self, request: &ConfirmBookingRequest) -> ConfirmBookingResponse {
        let outcome = match self.config(&request.parameters) {
            Ok(config) => {
                self.workflow(&config)
                    .confirm(&request.reservation_confirmation_code, &request.reservation_data)
                    .await
            }
            Err(e) => Err(e),
        };
        booking_response("confirm_booking", outcome)
    }

    pub async fn create_and_confirm_booking(
        &self,
        request: &CreateConfirmBookingRequest,
    ) -> ConfirmBookingResponse {
        let outcome = match self.config(&request.parameters) {
            Ok(config) => {
                self.workflow(&config)
                    .create_and_confirm(&request.reservation_data)
                    .await
            }
            Err(e) => Err(e),
        };
        booking_response("create_and_confirm_booking", outcome)
    }

    pub async fn cancel_booking(&self, request: &CancelBookingRequest) -> CancelBookingResponse {
        let outcome = match self.config(&request.parameters) {
            Ok(config) => {
                self.workflow(&config)
                    .cancel_booking(
                        &request.booking_confirmation_code,
                        request.reason_code.as_deref(),
                        request.note.as_deref(),
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => CancelBookingResponse {
                successful_cancellation: Some(Acknowledged {}),
                failed_cancellation: None,
            },
            Err(e) => CancelBookingResponse {
                successful_cancellation: None,
                failed_cancellation: Some(failure("cancel_booking", &e)),
            },
        }
    }

    pub async fn amend_booking(&self, request: &AmendBookingRequest) -> AmendBookingResponse {
        let failed = match self.config(&request.parameters) {
            Ok(config) => self.workflow(&config).amend(&request.booking_confirmation_code),
            Err(e) => failure("amend_booking", &e),
        };
        AmendBookingResponse {
            successful_amendment: None,
            failed_amendment: Some(failed),
        }
    }
}

fn booking_response(
    operation: &'static str,
    outcome: Result<SuccessfulBooking, FailureKind>,
) -> ConfirmBookingResponse {
    match outcome {
        Ok(booking) => ConfirmBookingResponse {
            successful_booking: Some(booking),
            failed_booking: None,
        },
        Err(e) => ConfirmBookingResponse {
            successful_booking: None,
            failed_booking: Some(failure(operation, &e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CHANNEL_ID, FILTER_IDS, MARKETPLACE_ID, PRIVATE_KEY, SMTP_PASSWORD, SMTP_SERVER, SMTP_USERNAME};
    use crate::email::mock_mail::{FixedImage, RecordingTransport};
    use crate::mapping::fixtures::{DEPARTURES, TOUR_SHOW};
    use crate::model::{DateYmd, ReservationData, Time};
    use crate::notify::mock_channel::RecordingChannel;
    use crate::notify::RetryPolicy;
    use crate::upstream::mock_upstream::ScriptedTransport;
    use crate::upstream::{
        BOOKING_CANCEL, BOOKING_COMMIT, TOUR_CHECK_AVAILABILITY, TOUR_DATES_AND_DEALS, TOUR_DEPARTURES,
        TOUR_SEARCH, TOUR_SHOW as SHOW_PATH,
    };
    use crate::workflow::fixtures::{CHECK_AVAILABILITY, COMMIT, NO_COMPONENTS, OK};
    use crate::client::UpstreamRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct ScriptedConnector {
        transport: Arc<dyn UpstreamTransport>,
        mail: Arc<RecordingTransport>,
    }

    impl Connector for ScriptedConnector {
        fn upstream(&self, _credentials: &Credentials) -> Arc<dyn UpstreamTransport> {
            self.transport.clone()
        }

        fn mail_transport(&self, smtp: &SmtpSettings) -> Option<Arc<dyn EmailTransport>> {
            if smtp.is_configured() {
                Some(self.mail.clone())
            } else {
                None
            }
        }
    }

    fn service(transport: Arc<dyn UpstreamTransport>) -> InventoryService<ScriptedConnector> {
        service_with(transport, Arc::new(NotificationDispatcher::disabled())).0
    }

    fn service_with(
        transport: Arc<dyn UpstreamTransport>,
        notifier: Arc<NotificationDispatcher>,
    ) -> (InventoryService<ScriptedConnector>, Arc<RecordingTransport>) {
        let mail = Arc::new(RecordingTransport::default());
        let connector = ScriptedConnector {
            transport,
            mail: mail.clone(),
        };
        let service = InventoryService::new(connector, notifier, Arc::new(FixedImage(Some(&b"png"[..]))))
            .with_env(Arc::new(|_| None));
        (service, mail)
    }

    fn params() -> Vec<PluginParameter> {
        vec![
            PluginParameter::new(MARKETPLACE_ID, "0"),
            PluginParameter::new(CHANNEL_ID, "3930"),
            PluginParameter::new(PRIVATE_KEY, "secret"),
        ]
    }

    fn reservation_data() -> ReservationData {
        ReservationData {
            customer_contact: crate::model::CustomerContact {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                phone: "+44 1".to_string(),
            },
            reservations: vec![crate::model::Reservation {
                external_product_id: "48".to_string(),
                date: DateYmd::new(2025, 6, 1),
                time: Some(Time::new(10, 0)),
                external_rate_id: "r1".to_string(),
                passengers: vec![crate::model::Passenger {
                    pricing_category_id: "r1".to_string(),
                }],
            }],
            notes: None,
            platform_id: Some("viator".to_string()),
        }
    }

    const SEARCH: &str = r#"<response>
  <error>OK</error>
  <tour><tour_id>48</tour_id><tour_name>Harbour Walk</tour_name><location>Lisbon</location><country>PT</country><from_price>40.00</from_price><from_price_display>From EUR 40</from_price_display></tour>
  <tour><tour_id>49</tour_id><tour_name>Tram Ride</tour_name><from_price>12.00</from_price><from_price_display>From EUR 12</from_price_display></tour>
</response>"#;

    #[tokio::test]
    async fn test_search_loads_categories_with_from_price_fallback() {
        let transport = ScriptedTransport::new();
        transport.respond(TOUR_SEARCH, SEARCH);
        transport.respond_once(TOUR_DEPARTURES, DEPARTURES);
        transport.fail(TOUR_DEPARTURES, FailureKind::Transport("timeout".into()));

        let products = service(transport.clone())
            .search_products(&SearchProductRequest { parameters: params() })
            .await;

        assert_eq!(products.len(), 2);
        let ids: Vec<&str> = products[0].pricing_categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(products[1].pricing_categories[0].id, "49_12.00");
        assert_eq!(products[1].pricing_categories[0].label, "From EUR 12");
        assert_eq!(transport.calls_to(TOUR_DEPARTURES)[0].query_value("per_page"), Some("30"));
    }

    // Answers the search directly and tracks how many departures calls overlap
    #[derive(Default)]
    struct InFlightTransport {
        search: String,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl UpstreamTransport for InFlightTransport {
        async fn call(&self, request: UpstreamRequest) -> Result<String, FailureKind> {
            if request.path == TOUR_SEARCH {
                return Ok(self.search.clone());
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(DEPARTURES.to_string())
        }
    }

    #[tokio::test]
    async fn test_search_bounds_departure_fan_out() {
        let tours: String = (1..=20)
            .map(|id| format!("<tour><tour_id>{id}</tour_id><tour_name>Tour {id}</tour_name></tour>"))
            .collect();
        let transport = Arc::new(InFlightTransport {
            search: format!("<response><error>OK</error>{tours}</response>"),
            ..Default::default()
        });

        let products = service(transport.clone())
            .search_products(&SearchProductRequest { parameters: params() })
            .await;

        assert_eq!(products.len(), 20);
        assert_eq!(products[19].id, "20");
        assert!(products.iter().all(|p| p.pricing_categories.len() == 2));
        assert_eq!(transport.peak.load(Ordering::SeqCst), UPSTREAM_FAN_OUT);
    }

    #[tokio::test]
    async fn test_missing_credentials_yield_empty_results() {
        let transport = ScriptedTransport::new();
        let products = service(transport.clone())
            .search_products(&SearchProductRequest { parameters: Vec::new() })
            .await;

        assert!(products.is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_get_product_by_id() {
        let transport = ScriptedTransport::new();
        transport.respond(SHOW_PATH, TOUR_SHOW);
        transport.respond(TOUR_DEPARTURES, DEPARTURES);

        let product = assert_ok!(
            service(transport.clone())
                .get_product_by_id(&GetProductByIdRequest {
                    parameters: params(),
                    external_id: "48".to_string(),
                })
                .await
        );

        assert_eq!(product.id, "48");
        assert_eq!(product.rates.len(), 2);
        assert_eq!(transport.calls_to(SHOW_PATH)[0].query_value("show_options"), Some("1"));
    }

    #[tokio::test]
    async fn test_empty_product_id_is_bad_request() {
        let err = assert_err!(
            service(ScriptedTransport::new())
                .get_product_by_id(&GetProductByIdRequest {
                    parameters: params(),
                    external_id: "  ".to_string(),
                })
                .await
        );
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_available_products_respect_filter_and_capacity() {
        let transport = ScriptedTransport::new();
        transport.respond(
            TOUR_DATES_AND_DEALS,
            r#"<response><error>OK</error><dates_and_prices>
                 <date><status>OPEN</status><spaces_remaining>4</spaces_remaining></date>
                 <date><status>OPEN</status><spaces_remaining>9</spaces_remaining></date>
               </dates_and_prices></response>"#,
        );
        let mut parameters = params();
        parameters.push(PluginParameter::new(FILTER_IDS, "48,49"));
        let range = DatePeriod {
            from: DateYmd::new(2025, 6, 1),
            to: DateYmd::new(2025, 6, 30),
        };
        let svc = service(transport.clone());

        let request = |required| ProductsAvailabilityRequest {
            parameters: parameters.clone(),
            external_product_ids: vec!["48".to_string(), "77".to_string()],
            range,
            required_capacity: required,
        };
        let fits = svc.get_available_products(&request(4)).await;
        assert!(fits[0].actual_check_done);
        assert!(!fits[1].actual_check_done);
        assert_eq!(fits[1].product_id, "77");

        let too_many = svc.get_available_products(&request(5)).await;
        assert!(!too_many[0].actual_check_done);
        assert_eq!(transport.calls_to(TOUR_DATES_AND_DEALS).len(), 2);
    }

    #[tokio::test]
    async fn test_product_availability_is_sorted_slots() {
        let transport = ScriptedTransport::new();
        transport.respond(TOUR_DEPARTURES, DEPARTURES);

        let slots = service(transport.clone())
            .get_product_availability(&ProductAvailabilityRequest {
                parameters: params(),
                product_id: "48".to_string(),
                range: DatePeriod {
                    from: DateYmd::new(2025, 6, 1),
                    to: DateYmd::new(2025, 6, 2),
                },
            })
            .await;

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].rates[0].rate_id, "r1");
        let call = &transport.calls_to(TOUR_DEPARTURES)[0];
        assert_eq!(call.query_value("start_date_start"), Some("2025-06-01"));
        assert_eq!(call.query_value("start_date_end"), Some("2025-06-02"));
    }

    #[tokio::test]
    async fn test_reservation_without_component_has_empty_code() {
        let transport = ScriptedTransport::new();
        transport.respond(TOUR_CHECK_AVAILABILITY, NO_COMPONENTS);

        let response = service(transport)
            .create_reservation(&ReservationRequest {
                parameters: params(),
                reservation_data: reservation_data(),
            })
            .await;

        assert_eq!(response.confirmation_code(), "");
        let failed = response.failed_reservation.unwrap();
        assert_eq!(failed.failure_kind.as_deref(), Some("upstream_rejected"));
    }

    #[tokio::test]
    async fn test_confirm_booking_succeeds_despite_chat_outage() {
        let transport = ScriptedTransport::new();
        transport.respond(BOOKING_COMMIT, COMMIT);
        let chat = RecordingChannel::new(
            "chat",
            RetryPolicy {
                max_retries: 0,
                delay: std::time::Duration::ZERO,
            },
        );
        chat.failing_always();
        let notifier = Arc::new(NotificationDispatcher::new(Some(chat.clone()), None));
        let (svc, mail) = service_with(transport, notifier.clone());

        let mut parameters = params();
        parameters.push(PluginParameter::new(SMTP_SERVER, "smtp.example.com"));
        parameters.push(PluginParameter::new(SMTP_USERNAME, "bookings@example.com"));
        parameters.push(PluginParameter::new(SMTP_PASSWORD, "pw"));

        let response = svc
            .confirm_booking(&ConfirmBookingRequest {
                parameters,
                reservation_confirmation_code: "5001".to_string(),
                reservation_data: reservation_data(),
            })
            .await;
        notifier.drain().await;

        let booking = response.successful_booking.unwrap();
        assert_eq!(booking.booking_confirmation_code, "5001");
        assert!(booking.confirmation_email_sent);
        assert!(booking.notification_dispatched);
        assert_eq!(mail.sent().len(), 1);
        assert_eq!(chat.received().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_booking_and_amendment() {
        let transport = ScriptedTransport::new();
        transport.respond(BOOKING_CANCEL, OK);
        let svc = service(transport);

        let cancelled = svc
            .cancel_booking(&CancelBookingRequest {
                parameters: params(),
                booking_confirmation_code: "5001".to_string(),
                reason_code: None,
                note: None,
            })
            .await;
        assert!(cancelled.successful_cancellation.is_some());

        let amended = svc
            .amend_booking(&AmendBookingRequest {
                parameters: params(),
                booking_confirmation_code: "5001".to_string(),
                reservation_data: reservation_data(),
            })
            .await;
        assert!(amended.successful_amendment.is_none());
        assert!(amended.failed_amendment.is_some());
    }

    #[tokio::test]
    async fn test_create_and_confirm_reports_failure_branch() {
        let transport = ScriptedTransport::new();
        transport.respond(TOUR_CHECK_AVAILABILITY, CHECK_AVAILABILITY);
        transport.fail(crate::upstream::BOOKING_START, FailureKind::Transport("reset".into()));

        let response = service(transport)
            .create_and_confirm_booking(&CreateConfirmBookingRequest {
                parameters: params(),
                reservation_data: reservation_data(),
            })
            .await;

        assert!(response.successful_booking.is_none());
        assert_eq!(response.failed_booking.unwrap().failure_kind.as_deref(), Some("transport"));
    }

    #[tokio::test]
    async fn test_http_connector_signs_marketplace_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/activity.json/booking/77"))
            .and(header_exists("x-bokun-signature"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id": 77}"#))
            .expect(1)
            .mount(&server)
            .await;

        let connector = HttpConnector::new(UpstreamConfig {
            marketplace_url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        let api = connector.marketplace_api(MarketplaceCredentials {
            access_key: "ak".to_string(),
            secret_key: secrecy::SecretString::from("sk".to_string()),
        });
        assert!(api.booking_exists("77").await.unwrap());
    }

    #[test]
    fn test_http_connector_skips_incomplete_smtp() {
        let connector = HttpConnector::new(UpstreamConfig::default()).unwrap();
        assert!(connector.mail_transport(&SmtpSettings::default()).is_none());
    }
}
