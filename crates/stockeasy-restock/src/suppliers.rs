//! Supplier directory

use serde::{Deserialize, Serialize};
use stockeasy_types::{Amount, PayeeId, ProductId, SupplierId};

/// One supplier's offer for one product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierOffer {
    pub supplier_id: SupplierId,
    /// Where payments for this supplier go
    pub payee_id: PayeeId,
    pub product_id: ProductId,
    /// Price of one unit in minor units of the session currency
    pub unit_price: Amount,
    /// Units the supplier can ship; `None` means no known cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_stock: Option<u64>,
}

impl SupplierOffer {
    pub fn can_supply(&self, quantity: u64) -> bool {
        self.available_stock.map_or(true, |stock| stock >= quantity)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierDirectory {
    offers: Vec<SupplierOffer>,
}

impl SupplierDirectory {
    pub fn new(offers: Vec<SupplierOffer>) -> Self {
        Self { offers }
    }

    pub fn add(&mut self, offer: SupplierOffer) {
        self.offers.push(offer);
    }

    pub fn offers(&self) -> &[SupplierOffer] {
        &self.offers
    }

    /// Cheapest offer for `product` that can ship `quantity`
    ///
    /// Ties go to the lowest supplier id so the choice is stable.
    pub fn cheapest(&self, product: &ProductId, quantity: u64) -> Option<&SupplierOffer> {
        self.offers
            .iter()
            .filter(|offer| &offer.product_id == product && offer.can_supply(quantity))
            .min_by(|a, b| {
                a.unit_price
                    .cmp(&b.unit_price)
                    .then_with(|| a.supplier_id.cmp(&b.supplier_id))
            })
    }
}
