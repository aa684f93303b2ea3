//! Exchange, queue and binding declarations shared by every participant
//!
//! Every process that asserts the exchange must declare it identically, or
//! the broker rejects the declaration.

/// Topic exchange carrying shopping events
pub const EXCHANGE_NAME: &str = "shopping_events";
/// Routing key of a completed checkout
pub const CHECKOUT_ROUTING_KEY: &str = "list.checkout.completed";
/// Pattern matching every checkout-related routing key
pub const CHECKOUT_BINDING: &str = "list.checkout.#";

pub const ORDERS_QUEUE: &str = "order_processing_queue";
pub const NOTIFICATIONS_QUEUE: &str = "notifications_queue";
pub const ANALYTICS_QUEUE: &str = "analytics_queue";

/// Exchange receiving messages that failed business processing
pub const DEAD_LETTER_EXCHANGE: &str = "shopping_events.dead_letter";
pub const DEAD_LETTER_QUEUE: &str = "shopping_events.dead_letter_queue";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
    Fanout,
    Direct,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
        }
    }

    /// Whether a binding with `pattern` receives a message sent with `routing_key`
    pub fn routes(&self, pattern: &str, routing_key: &str) -> bool {
        match self {
            ExchangeKind::Topic => topic_matches(pattern, routing_key),
            ExchangeKind::Fanout => true,
            ExchangeKind::Direct => pattern == routing_key,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    /// The durable topic exchange all checkout traffic flows through
    pub fn shopping_events() -> Self {
        Self {
            name: EXCHANGE_NAME.to_string(),
            kind: ExchangeKind::Topic,
            durable: true,
        }
    }

    pub fn dead_letter() -> Self {
        Self {
            name: DEAD_LETTER_EXCHANGE.to_string(),
            kind: ExchangeKind::Fanout,
            durable: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// Where nacked messages are republished
    pub dead_letter_exchange: Option<String>,
}

impl QueueSpec {
    /// Durable consumer queue that dead-letters failed messages
    pub fn consumer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            dead_letter_exchange: Some(DEAD_LETTER_EXCHANGE.to_string()),
        }
    }

    pub fn dead_letter() -> Self {
        Self {
            name: DEAD_LETTER_QUEUE.to_string(),
            durable: true,
            dead_letter_exchange: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub pattern: String,
}

/// Everything one consumer declares before it starts consuming
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumerTopology {
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    pub binding: Binding,
    pub dead_letter: Option<(ExchangeSpec, QueueSpec)>,
    pub prefetch: u16,
}

impl ConsumerTopology {
    /// Durable `queue` bound to the shopping exchange for all checkout events,
    /// one message in flight at a time
    pub fn checkout(queue: &str) -> Self {
        Self {
            exchange: ExchangeSpec::shopping_events(),
            queue: QueueSpec::consumer(queue),
            binding: Binding {
                queue: queue.to_string(),
                exchange: EXCHANGE_NAME.to_string(),
                pattern: CHECKOUT_BINDING.to_string(),
            },
            dead_letter: Some((ExchangeSpec::dead_letter(), QueueSpec::dead_letter())),
            prefetch: 1,
        }
    }

    /// Binding of the dead-letter queue, if any
    pub fn dead_letter_binding(&self) -> Option<Binding> {
        self.dead_letter.as_ref().map(|(exchange, queue)| Binding {
            queue: queue.name.clone(),
            exchange: exchange.name.clone(),
            pattern: "#".to_string(),
        })
    }
}

/// AMQP topic matching: words are dot-separated, `*` matches exactly one
/// word and `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = if routing_key.is_empty() {
        Vec::new()
    } else {
        routing_key.split('.').collect()
    };
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&k, key_rest)) if word == "*" || word == k => match_words(rest, key_rest),
            _ => false,
        },
    }
}
