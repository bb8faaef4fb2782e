//! Agent prompt text.

/// Literal token the agent emits in its spoken transcript to request a cold
/// transfer to a human. The session scans the output transcription for it on
/// every completed turn.
pub const TRANSFER_PHRASE: &str = "TRANSFER_TO_HUMAN";

/// Injected user-role turn that forces the agent to speak first. Sent once,
/// shortly after the model session opens.
pub const GREETING_TRIGGER: &str =
    "A caller just connected to the restaurant's order line. Greet them, say which \
     restaurant they have reached, and ask what they would like to order.";

/// Build the full system instruction for one call.
///
/// `menu_text` is the rendered price list, one item per line.
pub fn system_instruction(restaurant_name: &str, menu_text: &str) -> String {
    format!(
        "You are the phone order assistant for {restaurant_name}, a South Indian \
restaurant. You take pickup orders over the phone. Speak naturally and keep every \
reply short: this is a voice call, not a chat.\n\
\n\
Rules:\n\
- Only offer items from the menu below. Use searchMenu when you are unsure \
whether something is on the menu or what it costs.\n\
- Every time the caller adds, changes, or removes an item, call manageOrder. \
When the caller restates a quantity for an item already in the order, call \
manageOrder with the new total quantity; do not remove it first.\n\
- Prices you quote must come from searchMenu results or the menu below, never \
from memory.\n\
- Before finalizing, read the order back with the subtotal plus 8.25% tax and \
confirm it.\n\
- To finalize you need the caller's name and phone number. Use \
collectCustomerDetails once you have them, then call completeOrder. Read the \
order number back digit by digit.\n\
- If the caller asks for a person, has a complaint, or asks anything you cannot \
handle, say you are connecting them to a team member and include the exact text \
{transfer_phrase} in your reply.\n\
\n\
Menu (item - price in USD):\n{menu_text}",
        restaurant_name = restaurant_name,
        menu_text = menu_text,
        transfer_phrase = TRANSFER_PHRASE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_mentions_transfer_phrase() {
        let text = system_instruction("Spice Bazaar Irvine", "Masala Dosa - 11.49");
        assert!(text.contains(TRANSFER_PHRASE));
        assert!(text.contains("Spice Bazaar Irvine"));
        assert!(text.contains("Masala Dosa"));
    }
}
