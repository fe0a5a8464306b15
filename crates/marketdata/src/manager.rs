//! Per-symbol book maintenance from the quote stream.

use crate::book::{OrderBook, PriceLevel};
use bus::{EventBus, SubscriptionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use types::{EventBody, EventKind, Price, Symbol};

/// Display row for one symbol's best bid and offer.
#[derive(Debug, Clone, PartialEq)]
pub struct TopOfBook {
    pub symbol: Symbol,
    pub bid: Option<PriceLevel>,
    pub ask: Option<PriceLevel>,
    pub spread: Option<Price>,
    pub mid_price: Option<Price>,
}

struct BookManagerInner {
    books: Mutex<HashMap<Symbol, OrderBook>>,
}

/// Subscribes to Quote events and keeps one [`OrderBook`] per symbol.
pub struct BookManager {
    bus: EventBus,
    inner: Arc<BookManagerInner>,
    quote_sub: SubscriptionId,
}

impl BookManager {
    pub fn new(bus: EventBus) -> Self {
        let inner = Arc::new(BookManagerInner {
            books: Mutex::new(HashMap::new()),
        });

        let weak: Weak<BookManagerInner> = Arc::downgrade(&inner);
        let quote_sub = bus.subscribe(EventKind::Quote, move |ev| {
            if let (Some(inner), EventBody::Quote(quote)) = (weak.upgrade(), ev.body()) {
                let mut books = inner.books.lock();
                let book = books
                    .entry(quote.symbol.clone())
                    .or_insert_with(|| OrderBook::new(quote.symbol.clone()));
                book.update_bid(quote.bid_price, quote.bid_size);
                book.update_ask(quote.ask_price, quote.ask_size);
            }
        });

        Self {
            bus,
            inner,
            quote_sub,
        }
    }

    pub fn book(&self, symbol: &str) -> Option<OrderBook> {
        self.inner.books.lock().get(symbol).cloned()
    }

    pub fn has_book(&self, symbol: &str) -> bool {
        self.inner.books.lock().contains_key(symbol)
    }

    pub fn remove_book(&self, symbol: &str) {
        self.inner.books.lock().remove(symbol);
    }

    pub fn clear(&self) {
        self.inner.books.lock().clear();
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.inner.books.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn book_count(&self) -> usize {
        self.inner.books.lock().len()
    }

    pub fn top_of_book(&self, symbol: &str) -> Option<TopOfBook> {
        self.inner.books.lock().get(symbol).map(top_row)
    }

    /// Top-of-book rows for every tracked symbol, sorted by symbol.
    pub fn top_of_books(&self) -> Vec<TopOfBook> {
        let books = self.inner.books.lock();
        let mut rows: Vec<TopOfBook> = books.values().map(top_row).collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        rows
    }
}

fn top_row(book: &OrderBook) -> TopOfBook {
    TopOfBook {
        symbol: book.symbol().clone(),
        bid: book.best_bid(),
        ask: book.best_ask(),
        spread: book.spread(),
        mid_price: book.mid_price(),
    }
}

impl Drop for BookManager {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.quote_sub);
    }
}
