//! HTML bodies for customer order emails.

use std::fmt::Write;

use crate::domain::aggregates::{NotificationKind, Order};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

fn headline(kind: NotificationKind, number: &str) -> (String, &'static str) {
    match kind {
        NotificationKind::Confirmed => (format!("Order {number} confirmed"), "Thank you for your order. We have received it and will let you know as soon as it is on its way."),
        NotificationKind::Processing => (format!("Your order {number} is being prepared"), "A courier has been assigned and your order is being packed for dispatch."),
        NotificationKind::Shipped => (format!("Your order {number} has shipped"), "Your order has left our warehouse and is on its way to you."),
        NotificationKind::Delivered => (format!("Your order {number} has been delivered"), "Your order has been delivered. We hope you enjoy it."),
        NotificationKind::Cancelled => (format!("Your order {number} has been cancelled"), "Your order has been cancelled. If you paid online, the refund will be processed to your original payment method."),
    }
}

pub fn render(kind: NotificationKind, order: &Order, store_name: &str) -> RenderedEmail {
    let (subject, intro) = headline(kind, order.order_number());
    let customer = order.customer();
    let mut html = String::with_capacity(2048);

    let _ = write!(html, "<html><body style=\"font-family:Arial,sans-serif;color:#222\">");
    let _ = write!(html, "<h2>{}</h2>", escape(&subject));
    let _ = write!(html, "<p>Hi {},</p><p>{}</p>", escape(&customer.name), intro);

    if let Some(awb) = order.awb_code() {
        let ship = order.shipment();
        let _ = write!(html, "<h3>Tracking</h3><p>Courier: {}<br>Tracking number: {}</p>",
            escape(ship.courier_name.as_deref().unwrap_or("-")), escape(awb));
        if let Some(url) = ship.tracking_url.as_deref() {
            let _ = write!(html, "<p><a href=\"{0}\">{0}</a></p>", escape(url));
        }
    }

    let _ = write!(html, "<h3>Order summary</h3><table cellpadding=\"6\" style=\"border-collapse:collapse\">");
    let _ = write!(html, "<tr><th align=\"left\">Item</th><th>Qty</th><th align=\"right\">Price</th></tr>");
    for item in order.items() {
        let _ = write!(html, "<tr><td>{}</td><td align=\"center\">{}</td><td align=\"right\">{}</td></tr>",
            escape(&item.name), item.quantity, escape(&item.line_total(order.currency()).to_string()));
    }
    let rows = [
        ("Subtotal", order.subtotal()),
        ("Shipping", order.shipping_cost()),
        ("Tax", order.tax()),
        ("Discount", order.discount()),
        ("Total", order.total()),
    ];
    for (label, amount) in rows {
        if label != "Total" && amount.amount().is_zero() { continue; }
        let _ = write!(html, "<tr><td colspan=\"2\">{label}</td><td align=\"right\">{}</td></tr>", escape(&amount.to_string()));
    }
    let _ = write!(html, "</table>");

    let a = &customer.address;
    let _ = write!(html, "<h3>Shipping to</h3><p>{}<br>{}", escape(&customer.name), escape(&a.line1));
    if let Some(line2) = a.line2.as_deref().filter(|l| !l.is_empty()) {
        let _ = write!(html, "<br>{}", escape(line2));
    }
    let _ = write!(html, "<br>{}, {} {}<br>{}</p>", escape(&a.city), escape(&a.state), escape(&a.pincode), escape(&a.country));
    let _ = write!(html, "<p>The {} team</p></body></html>", escape(store_name));

    RenderedEmail { subject, html }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
